//! Configuration types for ring-walker
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation

use crate::error::{ConfigError, Result, WalkerError};
use clap::Parser;
use regex::Regex;
use std::path::PathBuf;

/// Maximum reasonable rank count
const MAX_RANKS: usize = 1024;

/// Parallel directory walker with work stealing between ranks
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ring-walker",
    version,
    about = "Parallel directory walker with work stealing between ranks",
    long_about = "Walks one or more directory trees with N ranks running as threads.\n\n\
                  Idle ranks steal work from random peers; a token circling the ranks\n\
                  detects when every rank is idle and the walk is complete.",
    after_help = "EXAMPLES:\n    \
        ring-walker /data\n    \
        ring-walker /data /home -n 16\n    \
        ring-walker /srv --exclude '\\.snapshot' --exclude '/proc' -d 5\n    \
        ring-walker /data --seed 42 -v  # reproducible peer choices"
)]
pub struct CliArgs {
    /// Directories to walk
    #[arg(value_name = "ROOT", required = true)]
    pub roots: Vec<PathBuf>,

    /// Number of ranks
    #[arg(
        short = 'n',
        long,
        default_value_t = default_ranks(),
        value_name = "NUM"
    )]
    pub ranks: usize,

    /// Seed for peer selection and queue splitting; rank r uses SEED + r
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Maximum directory depth (unlimited if not set)
    #[arg(short = 'd', long, value_name = "NUM")]
    pub max_depth: Option<u32>,

    /// Exclude directories matching pattern (can be repeated)
    #[arg(long = "exclude", value_name = "PATTERN", action = clap::ArgAction::Append)]
    pub exclude_patterns: Vec<String>,

    /// Quiet mode - suppress progress output
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose output (per-rank logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

fn default_ranks() -> usize {
    num_cpus::get()
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// Walk roots, in the order given
    pub roots: Vec<PathBuf>,

    /// Number of ranks
    pub rank_count: usize,

    /// Base RNG seed
    pub seed: Option<u64>,

    /// Maximum traversal depth
    pub max_depth: Option<u32>,

    /// Compiled exclude patterns
    pub exclude_patterns: Vec<Regex>,

    /// Show progress indicator
    pub show_progress: bool,
}

impl WalkConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        Self::validate(args).map_err(WalkerError::from)
    }

    fn validate(args: CliArgs) -> std::result::Result<Self, ConfigError> {
        if args.roots.is_empty() {
            return Err(ConfigError::NoRoots);
        }

        // Validate rank count
        if args.ranks == 0 || args.ranks > MAX_RANKS {
            return Err(ConfigError::InvalidRankCount {
                count: args.ranks,
                max: MAX_RANKS,
            });
        }

        // Every root must be an existing directory
        for root in &args.roots {
            let metadata = std::fs::metadata(root).map_err(|e| ConfigError::InvalidRoot {
                path: root.clone(),
                reason: e.to_string(),
            })?;
            if !metadata.is_dir() {
                return Err(ConfigError::InvalidRoot {
                    path: root.clone(),
                    reason: "Not a directory".into(),
                });
            }
        }

        // Compile exclude patterns
        let exclude_patterns = args
            .exclude_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidExcludePattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            roots: args.roots,
            rank_count: args.ranks,
            seed: args.seed,
            max_depth: args.max_depth,
            exclude_patterns,
            show_progress: !args.quiet,
        })
    }

    /// RNG seed for `rank`, if a base seed was given
    pub fn rank_seed(&self, rank: usize) -> Option<u64> {
        self.seed.map(|s| s.wrapping_add(rank as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["ring-walker"];
        argv.extend_from_slice(extra);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_parse_defaults() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = WalkConfig::from_args(args(&[root])).unwrap();

        assert_eq!(config.roots, vec![PathBuf::from(root)]);
        assert_eq!(config.rank_count, num_cpus::get());
        assert!(config.show_progress);
        assert_eq!(config.rank_seed(3), None);
    }

    #[test]
    fn test_parse_full() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config = WalkConfig::from_args(args(&[
            root, root, "-n", "4", "--seed", "10", "-d", "3", "--exclude", "tmp", "-q",
        ]))
        .unwrap();

        assert_eq!(config.roots.len(), 2);
        assert_eq!(config.rank_count, 4);
        assert_eq!(config.rank_seed(2), Some(12));
        assert_eq!(config.max_depth, Some(3));
        assert!(!config.show_progress);
    }

    #[test]
    fn test_roots_required() {
        assert!(CliArgs::try_parse_from(["ring-walker"]).is_err());
    }

    #[test]
    fn test_invalid_rank_count() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let err = WalkConfig::from_args(args(&[root, "-n", "0"])).unwrap_err();
        assert!(matches!(
            err,
            WalkerError::Config(ConfigError::InvalidRankCount { count: 0, .. })
        ));
    }

    #[test]
    fn test_invalid_root() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();

        let err = WalkConfig::from_args(args(&[file.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, WalkerError::Config(ConfigError::InvalidRoot { .. })));

        let missing = dir.path().join("missing");
        let err = WalkConfig::from_args(args(&[missing.to_str().unwrap()])).unwrap_err();
        assert!(matches!(err, WalkerError::Config(ConfigError::InvalidRoot { .. })));
    }

    #[test]
    fn test_exclude_pattern() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let config =
            WalkConfig::from_args(args(&[root, "--exclude", r"\.snapshot"])).unwrap();

        assert_eq!(config.exclude_patterns.len(), 1);
        assert!(config.exclude_patterns[0].is_match("/data/.snapshot/hourly.0"));

        let err = WalkConfig::from_args(args(&[root, "--exclude", "("])).unwrap_err();
        assert!(matches!(
            err,
            WalkerError::Config(ConfigError::InvalidExcludePattern { .. })
        ));
    }
}
