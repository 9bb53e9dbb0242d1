//! Viral scoring heuristics.
//!
//! Every function here is pure: the evaluation instant is passed in, no
//! clock is read, and a missing input yields `None` instead of a sentinel.
//! All bounded scores live on a `[0, 10]` scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::{ScoredVideo, VideoMetadata};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 10.0;

/// Floor applied before taking the log of a viral ratio.
const RATIO_FLOOR: f64 = 1e-4;
/// Shifts `log10(ratio)` so a ratio of 0.01 lands on zero.
const RATIO_LOG_OFFSET: f64 = 2.0;
/// Stretches the shifted log so a ratio of 100 lands on the top of the scale.
const RATIO_LOG_SCALE: f64 = 2.5;
/// `log10` of the views-per-day rate that saturates the velocity score
/// (100k views/day).
const VELOCITY_LOG_CEILING: f64 = 5.0;
const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Coarse bucket of the raw viral ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViralTier {
    /// Views at or above the subscriber count.
    Breakout,
    Strong,
    Rising,
    Baseline,
}

impl ViralTier {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 1.0 {
            Self::Breakout
        } else if ratio >= 0.5 {
            Self::Strong
        } else if ratio >= 0.1 {
            Self::Rising
        } else {
            Self::Baseline
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breakout => "breakout",
            Self::Strong => "strong",
            Self::Rising => "rising",
            Self::Baseline => "baseline",
        }
    }
}

fn clamp_score(value: f64) -> f64 {
    value.clamp(SCORE_MIN, SCORE_MAX)
}

/// Views divided by subscribers. `None` when either side is unknown or the
/// channel has no subscribers.
pub fn compute_viral_ratio(view_count: Option<u64>, subscriber_count: Option<u64>) -> Option<f64> {
    let views = view_count?;
    let subscribers = subscriber_count.filter(|count| *count > 0)?;
    Some(views as f64 / subscribers as f64)
}

/// Log-squashes a ratio onto `[0, 10]`: 0.01x maps to 0, 1x to 5, 100x to 10.
pub fn normalize_viral_ratio(viral_ratio: f64) -> f64 {
    let floored = if viral_ratio.is_nan() {
        RATIO_FLOOR
    } else {
        viral_ratio.max(RATIO_FLOOR)
    };
    clamp_score((floored.log10() + RATIO_LOG_OFFSET) * RATIO_LOG_SCALE)
}

/// Days between upload and `now`, never less than one.
pub fn days_since_upload(published_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_days = (now - published_at).num_milliseconds() as f64 / MILLIS_PER_DAY;
    elapsed_days.max(1.0)
}

/// Views per day since upload, log-squashed onto `[0, 10]`.
pub fn compute_velocity(
    view_count: Option<u64>,
    published_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<f64> {
    let views = view_count?;
    let published_at = published_at?;
    let raw_velocity = views as f64 / days_since_upload(published_at, now);
    Some(clamp_score(
        (raw_velocity + 1.0).log10() / VELOCITY_LOG_CEILING * SCORE_MAX,
    ))
}

pub fn compute_engagement_score(
    normalized_viral_score: Option<f64>,
    velocity_score: Option<f64>,
) -> Option<f64> {
    Some((normalized_viral_score? + velocity_score?) / 2.0)
}

/// Views over the median of the channel's recent uploads, rounded to two
/// decimals, paired with that median truncated to whole views.
///
/// Zero entries are treated as missing counts and skipped. `None` when the
/// video has no views or no usable baseline remains.
pub fn compute_outlier_score(
    view_count: Option<u64>,
    recent_channel_views: &[u64],
) -> Option<(f64, u64)> {
    let views = view_count.filter(|views| *views > 0)?;
    let median = median_views(recent_channel_views)?;
    let score = (views as f64 / median * 100.0).round() / 100.0;
    Some((score, median.trunc() as u64))
}

fn median_views(views: &[u64]) -> Option<f64> {
    let mut sorted: Vec<u64> = views.iter().copied().filter(|views| *views > 0).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid] as f64)
    } else {
        Some((sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0)
    }
}

/// Annotates one record with every derived score.
pub fn score(video: &VideoMetadata, now: DateTime<Utc>) -> ScoredVideo {
    let viral_ratio = compute_viral_ratio(video.view_count, video.subscriber_count);
    let normalized_viral_score = viral_ratio.map(normalize_viral_ratio);
    let velocity_score = compute_velocity(video.view_count, video.published_at, now);
    let engagement_score = compute_engagement_score(normalized_viral_score, velocity_score);
    let outlier = compute_outlier_score(video.view_count, &video.channel_recent_views);

    ScoredVideo {
        video: video.clone(),
        viral_ratio,
        normalized_viral_score,
        velocity_score,
        engagement_score,
        viral_tier: viral_ratio.map(ViralTier::from_ratio),
        outlier_score: outlier.map(|(score, _)| score),
        channel_average_views: outlier.map(|(_, median)| median),
    }
}
