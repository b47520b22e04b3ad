//! Raw engine progress to presentation-ready events.

use crate::ffmpeg::RawProgress;

use super::{JobId, ProgressEvent};

/// Integer percent in 0..=100. Missing, negative or non-finite input is 0;
/// anything above 100 is clamped to 100.
pub fn normalize_percent(raw: Option<f64>) -> u8 {
    match raw {
        Some(p) if p.is_finite() && p > 0.0 => p.round().min(100.0) as u8,
        _ => 0,
    }
}

/// `HH:MM:SS.cc`; unknown or negative time is `00:00:00.00`.
pub fn format_timemark(secs: Option<f64>) -> String {
    let centis = match secs {
        Some(s) if s.is_finite() && s > 0.0 => (s * 100.0).round() as u64,
        _ => 0,
    };
    let (total_secs, cc) = (centis / 100, centis % 100);
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        total_secs / 3600,
        (total_secs / 60) % 60,
        total_secs % 60,
        cc
    )
}

pub fn normalize_progress(job_id: &JobId, raw: &RawProgress) -> ProgressEvent {
    ProgressEvent {
        job_id: job_id.clone(),
        percent: normalize_percent(raw.percent),
        timemark: format_timemark(raw.out_time_secs),
        target_size: raw.total_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_percent_is_zero() {
        assert_eq!(normalize_percent(None), 0);
        assert_eq!(normalize_percent(Some(f64::NAN)), 0);
    }

    #[test]
    fn fractional_percent_rounds() {
        assert_eq!(normalize_percent(Some(57.4)), 57);
        assert_eq!(normalize_percent(Some(57.5)), 58);
    }

    #[test]
    fn out_of_range_percent_is_clamped() {
        assert_eq!(normalize_percent(Some(150.0)), 100);
        assert_eq!(normalize_percent(Some(-3.0)), 0);
        assert_eq!(normalize_percent(Some(100.0)), 100);
    }

    #[test]
    fn timemark_formatting() {
        assert_eq!(format_timemark(None), "00:00:00.00");
        assert_eq!(format_timemark(Some(-1.0)), "00:00:00.00");
        assert_eq!(format_timemark(Some(2.5)), "00:00:02.50");
        assert_eq!(format_timemark(Some(3725.333)), "01:02:05.33");
    }

    #[test]
    fn progress_keeps_job_id_and_size() {
        let id = JobId::from("job-a");
        let event = normalize_progress(
            &id,
            &RawProgress {
                percent: Some(42.6),
                out_time_secs: Some(4.26),
                total_size: Some(1024),
            },
        );
        assert_eq!(event.job_id, id);
        assert_eq!(event.percent, 43);
        assert_eq!(event.timemark, "00:00:04.26");
        assert_eq!(event.target_size, Some(1024));

        let empty = normalize_progress(&id, &RawProgress::default());
        assert_eq!(empty.percent, 0);
        assert_eq!(empty.target_size, None);
    }
}
