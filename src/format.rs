//! Human-readable renderings of counters, ages and ratios.

use chrono::{DateTime, Utc};

/// `1_234_567 -> "1.2M"`, `4_500 -> "4.5K"`, smaller values verbatim.
pub fn compact_count(value: u64) -> String {
    if value >= 1_000_000 {
        format!("{:.1}M", value as f64 / 1_000_000.0)
    } else if value >= 1_000 {
        format!("{:.1}K", value as f64 / 1_000.0)
    } else {
        value.to_string()
    }
}

/// Coarse age of an upload relative to `now`.
pub fn relative_age(published_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let hours = (now - published_at).num_hours();
    let days = hours / 24;

    if hours < 1 {
        "Just now".to_string()
    } else if hours < 24 {
        format!("{hours}h ago")
    } else if days < 7 {
        format!("{days}d ago")
    } else if days < 30 {
        format!("{}w ago", days / 7)
    } else {
        format!("{}mo ago", days / 30)
    }
}

pub fn ratio_label(ratio: Option<f64>) -> String {
    match ratio {
        Some(ratio) => format!("{ratio:.2}x"),
        None => "-".to_string(),
    }
}

pub fn score_label(score: Option<f64>) -> String {
    match score {
        Some(score) => format!("{score:.1}"),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn compact_count_thresholds() {
        assert_eq!(compact_count(999), "999");
        assert_eq!(compact_count(4_500), "4.5K");
        assert_eq!(compact_count(1_234_567), "1.2M");
    }

    #[test]
    fn relative_age_buckets() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(relative_age(now - Duration::minutes(59), now), "Just now");
        assert_eq!(relative_age(now + Duration::hours(2), now), "Just now");
        assert_eq!(relative_age(now - Duration::hours(5), now), "5h ago");
        assert_eq!(relative_age(now - Duration::days(3), now), "3d ago");
        assert_eq!(relative_age(now - Duration::days(15), now), "2w ago");
        assert_eq!(relative_age(now - Duration::days(95), now), "3mo ago");
    }

    #[test]
    fn labels_render_absent_values() {
        assert_eq!(ratio_label(Some(2.5)), "2.50x");
        assert_eq!(ratio_label(None), "-");
        assert_eq!(score_label(Some(7.26)), "7.3");
        assert_eq!(score_label(None), "-");
    }
}
