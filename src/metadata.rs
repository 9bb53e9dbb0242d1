//! Video metadata records consumed by the scorer and the scored records it
//! hands back.
//!
//! Records come from several producers (the YouTube Data API, saved clips,
//! yt-dlp style library exports) and none of them agree on
//! field names or encodings. Decoding is therefore lenient per field: a
//! value that cannot be understood becomes absent instead of failing the
//! record, and only a structurally wrong batch is rejected.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{ScoringError, ScoringResult};
use crate::scoring::ViralTier;

/// Epoch values above this are treated as milliseconds rather than seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Raw metadata for a single video as fetched from a metadata provider.
///
/// Counters are optional because providers routinely hide or omit them;
/// the scorer degrades those records instead of rejecting them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscriber_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail: String,
    pub url: String,
    /// View counts of the channel's latest uploads, used as the outlier
    /// baseline. Empty when the producer did not look them up.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channel_recent_views: Vec<u64>,
}

impl VideoMetadata {
    /// Builds a record from a loosely shaped JSON object.
    ///
    /// Besides the camelCase wire names this understands the snake_case
    /// names used by library exports (`videoid`, `views`,
    /// `subscriber_count`, `upload_date`, `author`, `thumbnail_url`) and the
    /// `uploadDate` field carried by saved clips.
    pub fn from_object(object: &Map<String, Value>) -> Self {
        let text = |keys: &[&str]| {
            first_present(object, keys)
                .and_then(string_from_value)
                .unwrap_or_default()
        };

        Self {
            video_id: text(&["videoId", "videoid", "sourceVideoId"]),
            title: text(&["title", "originalTitle"]),
            channel_id: text(&["channelId", "channel_id"]),
            channel_name: text(&["channelName", "channelTitle", "author"]),
            view_count: first_present(object, &["viewCount", "views"]).and_then(count_from_value),
            subscriber_count: first_present(object, &["subscriberCount", "subscriber_count"])
                .and_then(count_from_value),
            published_at: first_present(object, &["publishedAt", "uploadDate", "upload_date"])
                .and_then(timestamp_from_value),
            thumbnail: text(&["thumbnail", "thumbnail_url", "thumbnailUrl"]),
            url: text(&["url", "originalVideoUrl"]),
            channel_recent_views: first_present(
                object,
                &["channelRecentViews", "channel_recent_views"],
            )
            .map(counts_from_value)
            .unwrap_or_default(),
        }
    }
}

impl<'de> Deserialize<'de> for VideoMetadata {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self::from_object(&object))
    }
}

/// A video merged with the scores derived from it.
///
/// Derived fields are `None` when they cannot be computed and are then left
/// out of the JSON entirely, so consumers never see `NaN` or infinities.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredVideo {
    #[serde(flatten)]
    pub video: VideoMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viral_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_viral_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engagement_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viral_tier: Option<ViralTier>,
    /// Views over the median of the channel's recent uploads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_score: Option<f64>,
    /// The median the outlier score was taken against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_average_views: Option<u64>,
}

/// Decodes a batch of records. The batch itself must be an array of
/// objects; anything inside an object is decoded leniently.
pub fn parse_batch(value: Value) -> ScoringResult<Vec<VideoMetadata>> {
    let Value::Array(items) = value else {
        return Err(ScoringError::InvalidInput(format!(
            "expected an array of video records, found {}",
            value_kind(&value)
        )));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(object) => Ok(VideoMetadata::from_object(&object)),
            other => Err(ScoringError::InvalidInput(format!(
                "record {index} is {}, expected an object",
                value_kind(&other)
            ))),
        })
        .collect()
}

/// Like [`parse_batch`] but also accepts the `{"videos": [...]}` envelope
/// returned by the HTTP layer.
pub fn parse_batch_document(value: Value) -> ScoringResult<Vec<VideoMetadata>> {
    match value {
        Value::Object(mut object) if object.contains_key("videos") => {
            parse_batch(object.remove("videos").unwrap_or(Value::Null))
        }
        other => parse_batch(other),
    }
}

/// Parses raw JSON text with [`parse_batch_document`].
pub fn parse_batch_str(raw: &str) -> ScoringResult<Vec<VideoMetadata>> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| ScoringError::InvalidInput(format!("malformed JSON: {err}")))?;
    parse_batch_document(value)
}

/// Parses the timestamp encodings seen in the wild: RFC 3339, naive
/// ISO-8601 without offset (assumed UTC), `YYYY-MM-DD` and the compact
/// `YYYYMMDD` used by yt-dlp style exports.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(datetime.with_timezone(&Utc));
    }

    if trimmed.len() == 8 && trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        let date = NaiveDate::parse_from_str(trimmed, "%Y%m%d").ok()?;
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }

    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn string_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

/// Non-negative counter from a number or a decimal string. Providers send
/// counters as strings; negative values are sentinels for "hidden".
fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0)
                .map(|float| float.trunc() as u64)
        }),
        Value::String(text) => {
            let cleaned: String = text
                .trim()
                .chars()
                .filter(|ch| *ch != ',' && *ch != '_')
                .collect();
            cleaned.parse::<u64>().ok()
        }
        _ => None,
    }
}

/// Counters from an array; entries that are not counters are skipped.
fn counts_from_value(value: &Value) -> Vec<u64> {
    match value {
        Value::Array(items) => items.iter().filter_map(count_from_value).collect(),
        _ => Vec::new(),
    }
}

fn timestamp_from_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => {
            let raw = number.as_i64()?;
            if raw.abs() >= EPOCH_MILLIS_THRESHOLD {
                DateTime::<Utc>::from_timestamp_millis(raw)
            } else {
                DateTime::<Utc>::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
