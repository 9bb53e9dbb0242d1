#![forbid(unsafe_code)]

//! Ranks a JSON batch of videos from a file or stdin.

use std::{
    fmt::Write as _,
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use viraltube_tools::{
    config::LogFormat,
    format::{compact_count, ratio_label, relative_age, score_label},
    logging::init_tracing,
    metadata::{ScoredVideo, parse_batch_str},
    ranking::{QueryScope, RankOptions, ViralScorer},
    window::TimeWindow,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Parser)]
#[command(name = "rank_videos")]
#[command(about = "Rank videos by views-to-subscribers ratio", long_about = None)]
#[command(version)]
struct Cli {
    /// JSON array of videos, or an object with a `videos` array. `-` reads stdin.
    #[arg(short, long)]
    input: PathBuf,
    /// Time window: hour, today, week, month or year
    #[arg(short, long, default_value = "today")]
    filter: TimeWindow,
    /// Case-insensitive substring matched against titles
    #[arg(short, long)]
    query: Option<String>,
    /// Maximum number of videos to print
    #[arg(short, long)]
    limit: Option<usize>,
    /// Also match the query against channel names
    #[arg(long)]
    match_channel: bool,
    /// Rank only the N most viewed videos in the window
    #[arg(long)]
    pool: Option<usize>,
    /// Drop videos without a publish time
    #[arg(long)]
    skip_undated: bool,
    /// Reference time (RFC 3339); defaults to the current time
    #[arg(long)]
    now: Option<DateTime<Utc>>,
    #[arg(long, value_enum, default_value = "json")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct VideosEnvelope<'a> {
    videos: &'a [ScoredVideo],
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing("warn", LogFormat::Text)?;

    let raw = read_input(&cli.input)?;
    let records = parse_batch_str(&raw)
        .with_context(|| format!("parsing {}", cli.input.display()))?;

    let now = cli.now.unwrap_or_else(Utc::now);
    let scorer = ViralScorer::new(rank_options(&cli));
    let ranked = scorer.rank(&records, cli.filter, cli.query.as_deref(), cli.limit, now);
    info!(input = records.len(), ranked = ranked.len(), window = %cli.filter, "ranking complete");

    let output = match cli.format {
        OutputFormat::Json => {
            let mut rendered = serde_json::to_string_pretty(&VideosEnvelope { videos: &ranked })
                .context("serializing ranked videos")?;
            rendered.push('\n');
            rendered
        }
        OutputFormat::Table => render_table(&ranked, now),
    };
    print!("{output}");
    Ok(())
}

fn rank_options(cli: &Cli) -> RankOptions {
    RankOptions {
        query_scope: if cli.match_channel {
            QueryScope::TitleAndChannel
        } else {
            QueryScope::Title
        },
        candidate_pool: cli.pool,
        keep_undated: !cli.skip_undated,
    }
}

fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("reading videos from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn render_table(ranked: &[ScoredVideo], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:>4}  {:>10}  {:<9}  {:>6}  {:>7}  {:>9}  TITLE",
        "#", "RATIO", "TIER", "SCORE", "VIEWS", "AGE"
    );
    for (index, scored) in ranked.iter().enumerate() {
        let video = &scored.video;
        let tier = scored.viral_tier.map(|tier| tier.as_str()).unwrap_or("-");
        let views = video
            .view_count
            .map(compact_count)
            .unwrap_or_else(|| "-".to_string());
        let age = video
            .published_at
            .map(|published| relative_age(published, now))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{:>4}  {:>10}  {:<9}  {:>6}  {:>7}  {:>9}  {}",
            index + 1,
            ratio_label(scored.viral_ratio),
            tier,
            score_label(scored.engagement_score),
            views,
            age,
            video.title
        );
    }
    out
}
