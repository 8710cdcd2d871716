//! Command-line interface, per the external-interfaces contract: a single
//! binary with `--mode`, three positional REGULAR-only tuning knobs, and
//! `--max-runtime`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Regular,
    Fresh,
}

impl Mode {
    pub fn is_regular(self) -> bool {
        matches!(self, Mode::Regular)
    }
}

#[derive(Debug, Parser)]
#[command(name = "crawlcore", about = "A polite, high-throughput web crawler core")]
pub struct Cli {
    #[arg(long, value_enum, default_value_t = Mode::Regular)]
    pub mode: Mode,

    /// REGULAR only: number of fetch worker tasks.
    pub max_threads: Option<usize>,

    /// REGULAR only: maximum link-following depth.
    pub max_depth: Option<u32>,

    /// REGULAR only: capacity of the in-memory smart frontier.
    pub max_queue_size: Option<usize>,

    /// Minutes before an unconditional safety-timeout shutdown. 0 = unbounded.
    #[arg(long)]
    pub max_runtime: Option<u64>,

    /// Directory holding durable component state (metadata, robots cache, archive, disk queue).
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Directory holding the JSON configuration files (seeds.json, feeds.json, ...).
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,
}

impl Cli {
    pub fn resolved_max_threads(&self) -> usize {
        self.max_threads.unwrap_or(match self.mode {
            Mode::Regular => 16,
            Mode::Fresh => 4,
        })
    }

    pub fn resolved_max_depth(&self) -> u32 {
        self.max_depth.unwrap_or(5)
    }

    pub fn resolved_max_queue_size(&self) -> usize {
        self.max_queue_size.unwrap_or(100_000)
    }

    /// `0` (or unset, for FRESH) means unbounded.
    pub fn resolved_max_runtime(&self) -> Option<std::time::Duration> {
        let minutes = self.max_runtime.unwrap_or(match self.mode {
            Mode::Regular => 30,
            Mode::Fresh => 0,
        });
        if minutes == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(minutes * 60))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_regular() {
        let cli = Cli::parse_from(["crawlcore"]);
        assert_eq!(cli.mode, Mode::Regular);
        assert_eq!(cli.resolved_max_threads(), 16);
        assert_eq!(cli.resolved_max_runtime(), Some(std::time::Duration::from_secs(30 * 60)));
    }

    #[test]
    fn fresh_mode_defaults_to_unbounded_runtime() {
        let cli = Cli::parse_from(["crawlcore", "--mode", "fresh"]);
        assert_eq!(cli.resolved_max_threads(), 4);
        assert_eq!(cli.resolved_max_runtime(), None);
    }

    #[test]
    fn explicit_zero_runtime_means_unbounded() {
        let cli = Cli::parse_from(["crawlcore", "--max-runtime", "0"]);
        assert_eq!(cli.resolved_max_runtime(), None);
    }

    #[test]
    fn positional_overrides_are_parsed() {
        let cli = Cli::parse_from(["crawlcore", "8", "3", "5000"]);
        assert_eq!(cli.resolved_max_threads(), 8);
        assert_eq!(cli.resolved_max_depth(), 3);
        assert_eq!(cli.resolved_max_queue_size(), 5000);
    }
}
