//! Metadata provider backed by the YouTube Data API v3.
//!
//! A fetch runs three stages: a paginated search for recent videos ordered
//! by views, a statistics lookup for those videos, and a statistics lookup
//! for their channels. The client is blocking; async callers should run it
//! on a blocking thread.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::metadata::{VideoMetadata, parse_timestamp};
use crate::window::TimeWindow;

pub const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_FETCH_TARGET: usize = 200;
/// Maximum page size and id batch size accepted by the API.
const PAGE_SIZE: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const SEARCH_REGION: &str = "US";
const SEARCH_RELEVANCE_LANGUAGE: &str = "en";
const SEARCH_SAFE_SEARCH: &str = "moderate";

/// Restricts results to an audience: a video passes when its channel is
/// registered in one of `countries` or its language starts with `language`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudienceFilter {
    pub countries: Vec<String>,
    pub language: Option<String>,
}

impl AudienceFilter {
    pub fn is_disabled(&self) -> bool {
        self.countries.is_empty() && self.language.is_none()
    }

    pub fn allows(&self, language: Option<&str>, country: Option<&str>) -> bool {
        if self.is_disabled() {
            return true;
        }
        let country_match = country.is_some_and(|country| {
            self.countries
                .iter()
                .any(|target| target.eq_ignore_ascii_case(country))
        });
        let language_match = match (self.language.as_deref(), language) {
            (Some(prefix), Some(language)) => language.to_ascii_lowercase().starts_with(prefix),
            _ => false,
        };
        country_match || language_match
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchResponse {
    items: Vec<SearchItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SearchItemId {
    video_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoListResponse {
    items: Vec<VideoItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoItem {
    id: String,
    snippet: VideoSnippet,
    statistics: VideoStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoSnippet {
    title: String,
    channel_id: String,
    channel_title: String,
    published_at: Option<String>,
    thumbnails: Thumbnails,
    default_audio_language: Option<String>,
    default_language: Option<String>,
}

impl VideoSnippet {
    fn language(&self) -> Option<&str> {
        self.default_audio_language
            .as_deref()
            .filter(|value| !value.is_empty())
            .or(self.default_language.as_deref())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

impl Thumbnails {
    fn best_url(&self) -> Option<&str> {
        [&self.high, &self.medium, &self.default]
            .into_iter()
            .flatten()
            .map(|thumbnail| thumbnail.url.as_str())
            .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct VideoStatistics {
    view_count: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelListResponse {
    items: Vec<ChannelItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelItem {
    id: String,
    snippet: ChannelSnippet,
    statistics: ChannelStatistics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ChannelSnippet {
    title: String,
    country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ChannelStatistics {
    subscriber_count: Option<String>,
    hidden_subscriber_count: bool,
}

#[derive(Debug, Clone, Default)]
struct ChannelInfo {
    title: String,
    country: Option<String>,
    subscriber_count: Option<u64>,
}

impl From<ChannelItem> for ChannelInfo {
    fn from(item: ChannelItem) -> Self {
        let subscriber_count = if item.statistics.hidden_subscriber_count {
            None
        } else {
            item.statistics
                .subscriber_count
                .as_deref()
                .and_then(parse_counter)
        };
        Self {
            title: item.snippet.title,
            country: item.snippet.country.filter(|value| !value.is_empty()),
            subscriber_count,
        }
    }
}

/// Blocking YouTube Data API client.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    api_key: String,
    base_url: String,
    agent: ureq::Agent,
    fetch_target: usize,
    audience: AudienceFilter,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>, audience: AudienceFilter) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: YOUTUBE_API_BASE.to_string(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            fetch_target: DEFAULT_FETCH_TARGET,
            audience,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_fetch_target(mut self, fetch_target: usize) -> Self {
        self.fetch_target = fetch_target;
        self
    }

    /// Fetches the most viewed videos published inside `window` and
    /// returns them as raw metadata, unscored and unsorted.
    pub fn fetch_recent(
        &self,
        window: TimeWindow,
        query: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<VideoMetadata>> {
        let published_after = window
            .start(now)
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let video_ids = collect_search_ids(self.fetch_target, |page_token, limit| {
            self.search_page(&published_after, query, page_token, limit)
        })?;
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut videos = Vec::with_capacity(video_ids.len());
        for chunk in video_ids.chunks(PAGE_SIZE) {
            let ids = chunk.join(",");
            let response: VideoListResponse =
                self.get_json("videos", &[("part", "statistics,snippet"), ("id", ids.as_str())])?;
            videos.extend(response.items);
        }

        let mut channel_ids: Vec<String> = videos
            .iter()
            .map(|video| video.snippet.channel_id.clone())
            .filter(|id| !id.is_empty())
            .collect();
        channel_ids.sort();
        channel_ids.dedup();

        let mut channels = HashMap::with_capacity(channel_ids.len());
        for chunk in channel_ids.chunks(PAGE_SIZE) {
            let ids = chunk.join(",");
            let response: ChannelListResponse =
                self.get_json("channels", &[("part", "statistics,snippet"), ("id", ids.as_str())])?;
            for item in response.items {
                channels.insert(item.id.clone(), ChannelInfo::from(item));
            }
        }

        let fetched = videos.len();
        let records = assemble_records(videos, &channels, &self.audience);
        info!(
            window = %window,
            searched = video_ids.len(),
            fetched,
            channels = channels.len(),
            kept = records.len(),
            "fetched YouTube candidates"
        );
        Ok(records)
    }

    fn search_page(
        &self,
        published_after: &str,
        query: Option<&str>,
        page_token: Option<&str>,
        limit: usize,
    ) -> Result<SearchResponse> {
        let max_results = limit.to_string();
        let mut params = vec![
            ("part", "id,snippet"),
            ("type", "video"),
            ("publishedAfter", published_after),
            ("order", "viewCount"),
            ("maxResults", max_results.as_str()),
            ("relevanceLanguage", SEARCH_RELEVANCE_LANGUAGE),
            ("regionCode", SEARCH_REGION),
            ("safeSearch", SEARCH_SAFE_SEARCH),
        ];
        if let Some(query) = query.map(str::trim).filter(|query| !query.is_empty()) {
            params.push(("q", query));
        }
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token));
        }
        self.get_json("search", &params)
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let mut request = self.agent.get(&url).query("key", &self.api_key);
        for (key, value) in params {
            request = request.query(key, value);
        }
        debug!(endpoint, "calling YouTube API");

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                bail!(
                    "YouTube {endpoint} request failed with status {code}: {}",
                    api_error_message(&body)
                );
            }
            Err(err) => bail!("YouTube {endpoint} request failed: {err}"),
        };
        response
            .into_json::<T>()
            .with_context(|| format!("decoding YouTube {endpoint} response"))
    }
}

/// Walks search pages until `target` distinct ids are collected or the
/// API runs out of pages.
fn collect_search_ids<F>(target: usize, mut fetch_page: F) -> Result<Vec<String>>
where
    F: FnMut(Option<&str>, usize) -> Result<SearchResponse>,
{
    let mut ids = Vec::new();
    let mut seen = HashSet::new();
    let mut page_token: Option<String> = None;

    while ids.len() < target {
        let limit = (target - ids.len()).min(PAGE_SIZE);
        let page = fetch_page(page_token.as_deref(), limit)?;
        if page.items.is_empty() {
            break;
        }
        for video_id in page.items.into_iter().filter_map(|item| item.id.video_id) {
            if seen.insert(video_id.clone()) {
                ids.push(video_id);
            }
        }
        match page.next_page_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    ids.truncate(target);
    Ok(ids)
}

fn assemble_records(
    videos: Vec<VideoItem>,
    channels: &HashMap<String, ChannelInfo>,
    audience: &AudienceFilter,
) -> Vec<VideoMetadata> {
    videos
        .into_iter()
        .filter_map(|video| {
            let channel = channels.get(&video.snippet.channel_id);
            let country = channel.and_then(|info| info.country.as_deref());
            if !audience.allows(video.snippet.language(), country) {
                return None;
            }

            let channel_name = channel
                .map(|info| info.title.clone())
                .filter(|title| !title.is_empty())
                .unwrap_or_else(|| video.snippet.channel_title.clone());
            let thumbnail = video.snippet.thumbnails.best_url().unwrap_or_default().to_string();
            let url = format!("https://www.youtube.com/watch?v={}", video.id);

            Some(VideoMetadata {
                view_count: video.statistics.view_count.as_deref().and_then(parse_counter),
                subscriber_count: channel.and_then(|info| info.subscriber_count),
                published_at: video.snippet.published_at.as_deref().and_then(parse_timestamp),
                title: video.snippet.title,
                channel_id: video.snippet.channel_id,
                channel_name,
                thumbnail,
                url,
                video_id: video.id,
                channel_recent_views: Vec::new(),
            })
        })
        .collect()
}

fn parse_counter(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

/// Pulls `error.message` out of an API error body, falling back to the
/// raw text.
fn api_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|message| message.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn default_audience() -> AudienceFilter {
        AudienceFilter {
            countries: vec!["US".into(), "GB".into()],
            language: Some("en".into()),
        }
    }

    fn search_page(ids: &[&str], next: Option<&str>) -> SearchResponse {
        serde_json::from_value(json!({
            "items": ids.iter().map(|id| json!({ "id": { "kind": "youtube#video", "videoId": id } })).collect::<Vec<_>>(),
            "nextPageToken": next,
        }))
        .unwrap()
    }

    #[test]
    fn audience_filter_accepts_country_or_language() {
        let audience = default_audience();
        assert!(audience.allows(None, Some("us")));
        assert!(audience.allows(Some("en-GB"), Some("DE")));
        assert!(!audience.allows(Some("de"), Some("DE")));
        assert!(!audience.allows(None, None));
        assert!(AudienceFilter::default().allows(None, None));
    }

    #[test]
    fn search_stops_when_pages_run_out() {
        let mut calls = Vec::new();
        let ids = collect_search_ids(200, |token, limit| {
            calls.push((token.map(str::to_string), limit));
            Ok(match token {
                None => search_page(&["a", "b"], Some("p2")),
                Some("p2") => search_page(&["b", "c"], None),
                Some(other) => panic!("unexpected token {other}"),
            })
        })
        .unwrap();

        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(calls, vec![(None, 50), (Some("p2".to_string()), 50)]);
    }

    #[test]
    fn search_respects_target() {
        let ids = collect_search_ids(3, |_, limit| {
            assert_eq!(limit, 3);
            Ok(search_page(&["a", "b", "c", "d"], Some("more")))
        })
        .unwrap();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn search_stops_on_empty_page() {
        let ids = collect_search_ids(10, |_, _| Ok(search_page(&[], Some("loop")))).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn search_propagates_errors() {
        let err = collect_search_ids(10, |_, _| Err(anyhow::anyhow!("quota exceeded"))).unwrap_err();
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn assembles_records_from_api_payloads() {
        let videos: VideoListResponse = serde_json::from_value(json!({
            "items": [
                {
                    "id": "vid1",
                    "snippet": {
                        "title": "Big Upload",
                        "channelId": "UC1",
                        "channelTitle": "Snippet Title",
                        "publishedAt": "2025-03-10T08:00:00Z",
                        "thumbnails": {
                            "default": { "url": "https://i.ytimg.com/vi/vid1/default.jpg" },
                            "high": { "url": "https://i.ytimg.com/vi/vid1/hqdefault.jpg" }
                        },
                        "defaultAudioLanguage": "en"
                    },
                    "statistics": { "viewCount": "123456" }
                },
                {
                    "id": "vid2",
                    "snippet": {
                        "title": "Hidden Subs",
                        "channelId": "UC2",
                        "channelTitle": "Fallback Name",
                        "publishedAt": "2025-03-09T08:00:00Z",
                        "thumbnails": { "medium": { "url": "https://i.ytimg.com/vi/vid2/mqdefault.jpg" } }
                    },
                    "statistics": {}
                },
                {
                    "id": "vid3",
                    "snippet": { "title": "Elsewhere", "channelId": "UC3", "defaultLanguage": "fr" },
                    "statistics": { "viewCount": "5" }
                }
            ]
        }))
        .unwrap();
        let channels: ChannelListResponse = serde_json::from_value(json!({
            "items": [
                { "id": "UC1", "snippet": { "title": "Channel One", "country": "CA" }, "statistics": { "subscriberCount": "1000" } },
                { "id": "UC2", "snippet": { "title": "", "country": "GB" }, "statistics": { "subscriberCount": "0", "hiddenSubscriberCount": true } },
                { "id": "UC3", "snippet": { "title": "Chaîne", "country": "FR" }, "statistics": { "subscriberCount": "50" } }
            ]
        }))
        .unwrap();
        let channels: HashMap<String, ChannelInfo> = channels
            .items
            .into_iter()
            .map(|item| (item.id.clone(), ChannelInfo::from(item)))
            .collect();

        let records = assemble_records(videos.items, &channels, &default_audience());
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.video_id, "vid1");
        assert_eq!(first.channel_name, "Channel One");
        assert_eq!(first.view_count, Some(123_456));
        assert_eq!(first.subscriber_count, Some(1_000));
        assert_eq!(first.thumbnail, "https://i.ytimg.com/vi/vid1/hqdefault.jpg");
        assert_eq!(first.url, "https://www.youtube.com/watch?v=vid1");
        assert_eq!(
            first.published_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap())
        );

        let second = &records[1];
        assert_eq!(second.channel_name, "Fallback Name");
        assert_eq!(second.view_count, None);
        assert_eq!(second.subscriber_count, None);
        assert_eq!(second.thumbnail, "https://i.ytimg.com/vi/vid2/mqdefault.jpg");
    }

    #[test]
    fn missing_channel_keeps_record_when_filter_disabled() {
        let videos: VideoListResponse = serde_json::from_value(json!({
            "items": [{ "id": "orphan", "snippet": { "channelId": "UCX", "channelTitle": "Orphan" } }]
        }))
        .unwrap();
        let records = assemble_records(videos.items, &HashMap::new(), &AudienceFilter::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].channel_name, "Orphan");
        assert_eq!(records[0].subscriber_count, None);
    }

    #[test]
    fn api_error_message_prefers_structured_body() {
        let body = r#"{"error":{"code":403,"message":"quotaExceeded"}}"#;
        assert_eq!(api_error_message(body), "quotaExceeded");
        assert_eq!(api_error_message(" plain failure "), "plain failure");
    }

    #[test]
    fn unreachable_api_reports_transport_error() {
        let client = YouTubeClient::new("key", AudienceFilter::default())
            .with_base_url("http://127.0.0.1:1")
            .with_fetch_target(5);
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        let err = client.fetch_recent(TimeWindow::Today, None, now).unwrap_err();
        assert!(err.to_string().contains("YouTube search request failed"));
    }
}
