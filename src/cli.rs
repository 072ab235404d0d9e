//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use gwaripper::{AudioHost, RipperConfig};

/// Download audio from Reddit submissions and audio-hosting sites.
///
/// URLs are taken from the arguments, or one per line from stdin. Every
/// download is recorded in the library database below the root directory so
/// nothing is fetched twice.
#[derive(Parser, Debug)]
#[command(name = "gwaripper")]
#[command(author, version)]
pub struct Args {
    /// URLs to extract and download
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Library root holding the database, reports and downloaded files
    #[arg(short = 'o', long, default_value = ".")]
    pub root: PathBuf,

    /// Audio hosts in order of preference, comma separated
    #[arg(long, value_delimiter = ',')]
    pub host_priority: Vec<AudioHost>,

    /// Download only the best-ranked host when a post links the same audio on several hosts
    #[arg(long)]
    pub only_one_mirror: bool,

    /// Add reddit context to soundgasm files that were downloaded without it
    #[arg(long)]
    pub set_missing_reddit: bool,

    /// Imgur API client id; imgur links are reported as unauthenticated without it
    #[arg(long)]
    pub imgur_client_id: Option<String>,

    /// Skip submissions whose title contains this tag (repeatable)
    #[arg(long = "banned-tag")]
    pub banned_tags: Vec<String>,

    /// Skip titles containing TAG unless they also contain UNLESS, given as TAG,UNLESS (repeatable)
    #[arg(long = "banned-tag-combo", value_name = "TAG,UNLESS", value_parser = parse_tag_combo)]
    pub banned_tag_combos: Vec<(String, String)>,

    /// Minimum delay between requests to same domain in milliseconds (0 to disable, max 60000)
    #[arg(short = 'l', long, default_value_t = 500, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub rate_limit: u64,

    /// ffmpeg binary used to join HLS segments
    #[arg(long, default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,
}

impl Args {
    /// Run configuration; unset options keep their defaults.
    #[must_use]
    pub fn to_config(&self) -> RipperConfig {
        let mut config = RipperConfig::with_root(&self.root);
        if !self.host_priority.is_empty() {
            config.host_priority.clone_from(&self.host_priority);
        }
        config.only_one_mirror = self.only_one_mirror;
        config.set_missing_reddit = self.set_missing_reddit;
        config.extractor.imgur_client_id.clone_from(&self.imgur_client_id);
        config.extractor.banned_tags.clone_from(&self.banned_tags);
        config.extractor.tag_combos.clone_from(&self.banned_tag_combos);
        config.request_delay = Duration::from_millis(self.rate_limit);
        config.ffmpeg_path.clone_from(&self.ffmpeg);
        config.show_progress = !self.quiet;
        config
    }
}

fn parse_tag_combo(value: &str) -> Result<(String, String), String> {
    let (tag, unless) = value
        .split_once(',')
        .ok_or_else(|| format!("expected TAG,UNLESS, got '{value}'"))?;
    let (tag, unless) = (tag.trim(), unless.trim());
    if tag.is_empty() || unless.is_empty() {
        return Err(format!("both tags of '{value}' must be non-empty"));
    }
    Ok((tag.to_string(), unless.to_string()))
}

/// Non-empty lines of `text` that are not `#` comments, trimmed.
#[must_use]
pub fn collect_urls(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}
