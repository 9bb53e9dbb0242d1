//! Time-windowed ranking of scored videos.
//!
//! [`ViralScorer`] is stateless apart from its options, so a single instance
//! can be shared across request handlers without locking.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ScoringResult;
use crate::metadata::{ScoredVideo, VideoMetadata};
use crate::scoring::score;
use crate::window::TimeWindow;

/// Which fields a free-text query is matched against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryScope {
    #[default]
    Title,
    TitleAndChannel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankOptions {
    pub query_scope: QueryScope,
    /// When set, only the `n` most viewed survivors are ranked by ratio.
    pub candidate_pool: Option<usize>,
    /// Keep records whose publish time is unknown.
    pub keep_undated: bool,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            query_scope: QueryScope::Title,
            candidate_pool: None,
            keep_undated: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViralScorer {
    options: RankOptions,
}

impl ViralScorer {
    pub fn new(options: RankOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RankOptions {
        &self.options
    }

    /// Filters `records` by window and query, scores the survivors and
    /// orders them by descending viral ratio.
    ///
    /// Records without a ratio trail the rest. The sort is stable, so ties
    /// and unscored records keep their input order.
    pub fn rank(
        &self,
        records: &[VideoMetadata],
        window: TimeWindow,
        query: Option<&str>,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Vec<ScoredVideo> {
        let needle = normalize_query(query);
        let mut eligible: Vec<&VideoMetadata> = records
            .iter()
            .filter(|record| self.in_window(record, window, now))
            .filter(|record| self.matches_query(record, needle.as_deref()))
            .collect();
        let survivors = eligible.len();

        if let Some(pool) = self.options.candidate_pool {
            eligible.sort_by(|a, b| descending_option(a.view_count, b.view_count));
            eligible.truncate(pool);
        }

        let mut ranked: Vec<ScoredVideo> = eligible
            .into_iter()
            .map(|record| score(record, now))
            .collect();
        ranked.sort_by(|a, b| descending_ratio(a.viral_ratio, b.viral_ratio));

        if let Some(limit) = limit {
            ranked.truncate(limit);
        }

        debug!(
            records = records.len(),
            window = %window,
            survivors,
            returned = ranked.len(),
            "ranked video batch"
        );
        ranked
    }

    /// [`rank`](Self::rank) with the window given as its wire literal.
    /// Unknown literals are rejected before any record is touched.
    pub fn rank_filter(
        &self,
        records: &[VideoMetadata],
        filter: &str,
        query: Option<&str>,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> ScoringResult<Vec<ScoredVideo>> {
        let window: TimeWindow = filter.parse()?;
        Ok(self.rank(records, window, query, limit, now))
    }

    fn in_window(&self, record: &VideoMetadata, window: TimeWindow, now: DateTime<Utc>) -> bool {
        match record.published_at {
            Some(published_at) => window.contains(published_at, now),
            None => self.options.keep_undated,
        }
    }

    fn matches_query(&self, record: &VideoMetadata, needle: Option<&str>) -> bool {
        let Some(needle) = needle else {
            return true;
        };
        if record.title.to_lowercase().contains(needle) {
            return true;
        }
        self.options.query_scope == QueryScope::TitleAndChannel
            && record.channel_name.to_lowercase().contains(needle)
    }
}

/// Ranks with default options.
pub fn rank(
    records: &[VideoMetadata],
    window: TimeWindow,
    query: Option<&str>,
    limit: Option<usize>,
    now: DateTime<Utc>,
) -> Vec<ScoredVideo> {
    ViralScorer::default().rank(records, window, query, limit, now)
}

/// Lowercased needle. Whitespace only decides blankness; a non-blank query
/// is matched as given, surrounding spaces included.
fn normalize_query(query: Option<&str>) -> Option<String> {
    query
        .filter(|value| !value.trim().is_empty())
        .map(str::to_lowercase)
}

fn descending_ratio(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn descending_option(a: Option<u64>, b: Option<u64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScoringError;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn video(id: &str, views: Option<u64>, subs: Option<u64>, age: Duration) -> VideoMetadata {
        VideoMetadata {
            video_id: id.into(),
            title: format!("Video {id}"),
            channel_id: format!("UC{id}"),
            channel_name: "Some Channel".into(),
            view_count: views,
            subscriber_count: subs,
            published_at: Some(now() - age),
            thumbnail: String::new(),
            url: format!("https://www.youtube.com/watch?v={id}"),
            channel_recent_views: Vec::new(),
        }
    }

    fn ids(ranked: &[ScoredVideo]) -> Vec<&str> {
        ranked.iter().map(|item| item.video.video_id.as_str()).collect()
    }

    #[test]
    fn breakout_video_in_today_window() {
        let records = vec![video("hit", Some(1_000_000), Some(10_000), Duration::hours(2))];
        let ranked = rank(&records, TimeWindow::Today, None, None, now());
        assert_eq!(ranked.len(), 1);
        let hit = &ranked[0];
        assert_eq!(hit.viral_ratio, Some(100.0));
        assert_eq!(hit.normalized_viral_score, Some(10.0));
        let velocity = hit.velocity_score.unwrap();
        assert_eq!(hit.engagement_score, Some((10.0 + velocity) / 2.0));
    }

    #[test]
    fn missing_subscribers_sort_last() {
        let records = vec![
            video("hidden", Some(9_000_000), None, Duration::days(1)),
            video("known", Some(10), Some(1_000), Duration::days(2)),
        ];
        let ranked = rank(&records, TimeWindow::Week, None, None, now());
        assert_eq!(ids(&ranked), vec!["known", "hidden"]);
        assert_eq!(ranked[1].viral_ratio, None);
        assert_eq!(ranked[1].engagement_score, None);
        assert!(ranked[1].velocity_score.is_some());
    }

    #[test]
    fn month_window_excludes_older_videos() {
        let records = vec![
            video("recent", Some(100), Some(100), Duration::days(2)),
            video("stale", Some(100), Some(100), Duration::days(40)),
        ];
        let ranked = rank(&records, TimeWindow::Month, None, None, now());
        assert_eq!(ids(&ranked), vec!["recent"]);
    }

    #[test]
    fn future_videos_fall_outside_window() {
        let records = vec![video("skewed", Some(100), Some(100), -Duration::minutes(5))];
        assert!(rank(&records, TimeWindow::Year, None, None, now()).is_empty());
    }

    #[test]
    fn query_is_case_insensitive_substring() {
        let mut record = video("fail", Some(10), Some(10), Duration::hours(1));
        record.title = "Epic Fail Compilation".into();
        let records = vec![record];

        let hits = rank(&records, TimeWindow::Today, Some("fail"), None, now());
        assert_eq!(hits.len(), 1);
        let misses = rank(&records, TimeWindow::Today, Some("FAILS"), None, now());
        assert!(misses.is_empty());
        let blank = rank(&records, TimeWindow::Today, Some("   "), None, now());
        assert_eq!(blank.len(), 1);
    }

    #[test]
    fn query_whitespace_is_part_of_the_needle() {
        let mut joined = video("joined", Some(10), Some(10), Duration::hours(1));
        joined.title = "EpicFail".into();
        let mut spaced = video("spaced", Some(10), Some(10), Duration::hours(1));
        spaced.title = "Epic Fail".into();
        let records = vec![joined, spaced];

        let ranked = rank(&records, TimeWindow::Today, Some(" fail"), None, now());
        assert_eq!(ids(&ranked), vec!["spaced"]);
    }

    #[test]
    fn channel_matching_is_opt_in() {
        let mut record = video("c", Some(10), Some(10), Duration::hours(1));
        record.channel_name = "MrGadget".into();
        let records = vec![record];

        assert!(rank(&records, TimeWindow::Today, Some("gadget"), None, now()).is_empty());

        let scorer = ViralScorer::new(RankOptions {
            query_scope: QueryScope::TitleAndChannel,
            ..RankOptions::default()
        });
        let ranked = scorer.rank(&records, TimeWindow::Today, Some("gadget"), None, now());
        assert_eq!(ranked.len(), 1);
    }

    #[test]
    fn orders_by_descending_ratio() {
        let records: Vec<VideoMetadata> = [3u64, 1, 5, 2, 4]
            .iter()
            .map(|ratio| {
                video(
                    &format!("r{ratio}"),
                    Some(ratio * 100),
                    Some(100),
                    Duration::days(1),
                )
            })
            .collect();
        let ranked = rank(&records, TimeWindow::Year, None, None, now());
        let ratios: Vec<f64> = ranked.iter().filter_map(|item| item.viral_ratio).collect();
        assert_eq!(ratios, vec![5.0, 4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn unscored_and_tied_records_keep_input_order() {
        let records = vec![
            video("u1", None, None, Duration::hours(3)),
            video("t1", Some(50), Some(100), Duration::hours(3)),
            video("u2", Some(10), Some(0), Duration::hours(3)),
            video("t2", Some(50), Some(100), Duration::hours(3)),
            video("top", Some(500), Some(100), Duration::hours(3)),
        ];
        let ranked = rank(&records, TimeWindow::Today, None, None, now());
        assert_eq!(ids(&ranked), vec!["top", "t1", "t2", "u1", "u2"]);
    }

    #[test]
    fn limit_truncates_after_sorting() {
        let records = vec![
            video("low", Some(1), Some(100), Duration::hours(3)),
            video("high", Some(900), Some(100), Duration::hours(3)),
            video("mid", Some(50), Some(100), Duration::hours(3)),
        ];
        let ranked = rank(&records, TimeWindow::Today, None, Some(2), now());
        assert_eq!(ids(&ranked), vec!["high", "mid"]);
        assert!(rank(&records, TimeWindow::Today, None, Some(0), now()).is_empty());
    }

    #[test]
    fn candidate_pool_keeps_most_viewed_first() {
        let records = vec![
            video("tiny-channel", Some(1_000), Some(10), Duration::hours(3)),
            video("big-views", Some(5_000_000), Some(10_000_000), Duration::hours(3)),
            video("mid-views", Some(80_000), Some(1_000), Duration::hours(3)),
        ];
        let scorer = ViralScorer::new(RankOptions {
            candidate_pool: Some(2),
            ..RankOptions::default()
        });
        let ranked = scorer.rank(&records, TimeWindow::Today, None, None, now());
        assert_eq!(ids(&ranked), vec!["mid-views", "big-views"]);
    }

    #[test]
    fn undated_records_are_configurable() {
        let mut undated = video("undated", Some(10), Some(10), Duration::zero());
        undated.published_at = None;
        let records = vec![undated];

        assert_eq!(rank(&records, TimeWindow::Hour, None, None, now()).len(), 1);

        let strict = ViralScorer::new(RankOptions {
            keep_undated: false,
            ..RankOptions::default()
        });
        assert!(strict.rank(&records, TimeWindow::Hour, None, None, now()).is_empty());
    }

    #[test]
    fn empty_batch_ranks_to_empty() {
        assert!(rank(&[], TimeWindow::Week, None, None, now()).is_empty());
    }

    #[test]
    fn rank_is_deterministic() {
        let records = vec![
            video("a", Some(300), Some(100), Duration::hours(5)),
            video("b", None, Some(100), Duration::hours(6)),
            video("c", Some(300), Some(100), Duration::hours(7)),
        ];
        let first = serde_json::to_vec(&rank(&records, TimeWindow::Today, None, None, now())).unwrap();
        let second =
            serde_json::to_vec(&rank(&records, TimeWindow::Today, None, None, now())).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rank_filter_rejects_unknown_literal() {
        let scorer = ViralScorer::default();
        let err = scorer
            .rank_filter(&[], "decade", None, None, now())
            .unwrap_err();
        assert_eq!(err, ScoringError::InvalidFilter("decade".into()));
        assert!(scorer.rank_filter(&[], "week", None, None, now()).unwrap().is_empty());
    }

    fn arb_record() -> impl Strategy<Value = (i64, Option<u64>, Option<u64>)> {
        (
            -120i64..60 * 24 * 400,
            proptest::option::of(0u64..10_000_000),
            proptest::option::of(0u64..1_000_000),
        )
    }

    proptest! {
        #[test]
        fn ranked_output_respects_window_and_order(
            specs in proptest::collection::vec(arb_record(), 0..40),
            window_index in 0usize..TimeWindow::ALL.len(),
        ) {
            let window = TimeWindow::ALL[window_index];
            let records: Vec<VideoMetadata> = specs
                .iter()
                .enumerate()
                .map(|(index, (age_minutes, views, subs))| {
                    video(&format!("v{index}"), *views, *subs, Duration::minutes(*age_minutes))
                })
                .collect();

            let ranked = rank(&records, window, None, None, now());

            let expected = records
                .iter()
                .filter(|record| window.contains(record.published_at.unwrap(), now()))
                .count();
            prop_assert_eq!(ranked.len(), expected);
            for item in &ranked {
                prop_assert!(window.contains(item.video.published_at.unwrap(), now()));
            }

            let first_unscored = ranked
                .iter()
                .position(|item| item.viral_ratio.is_none())
                .unwrap_or(ranked.len());
            prop_assert!(ranked[first_unscored..].iter().all(|item| item.viral_ratio.is_none()));
            let ratios: Vec<f64> = ranked[..first_unscored]
                .iter()
                .filter_map(|item| item.viral_ratio)
                .collect();
            prop_assert!(ratios.windows(2).all(|pair| pair[0] >= pair[1]));
        }
    }
}
