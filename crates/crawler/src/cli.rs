use citecrawl_common::config::CrawlerConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Recursive citation-graph crawler.
/// Exit codes: 0=success, 1=items or publishes failed, 2=invalid arguments
#[derive(Parser, Debug)]
#[command(name = "citecrawl")]
#[command(about = "Crawl a citation graph from seed titles into PostgreSQL")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true, help = "Configuration file, layered under APP__ environment variables")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Publish seed titles to the work queue at depth 0.
    Seed {
        #[arg(short, long, help = "CSV with a Title column, or one title per line")]
        file: PathBuf,
    },

    /// Consume the work queue until stopped.
    Work(WorkArgs),
}

#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkArgs {
    #[arg(
        long,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-1..),
        help = "Maximum traversal depth, -1 for unbounded [config default: 2]"
    )]
    pub max_depth: Option<i32>,

    #[arg(long, help = "Pause before each republished reference, in milliseconds")]
    pub politeness_ms: Option<u64>,

    #[arg(long, help = "Items held mid-flight by the pool")]
    pub max_in_flight: Option<usize>,

    #[arg(long, help = "Simultaneous outbound fetches")]
    pub max_concurrent_fetches: Option<usize>,

    #[arg(long, help = "Exit once the queue is empty and nothing is in flight")]
    pub exit_when_idle: bool,
}

impl WorkArgs {
    /// Override configured values with the flags that were given
    pub fn apply(&self, crawler: &mut CrawlerConfig) {
        if let Some(depth) = self.max_depth {
            crawler.max_depth = depth;
        }
        if let Some(ms) = self.politeness_ms {
            crawler.politeness_ms = ms;
        }
        if let Some(n) = self.max_in_flight {
            crawler.max_in_flight = n;
        }
        if let Some(n) = self.max_concurrent_fetches {
            crawler.max_concurrent_fetches = n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seed() {
        let cli = Cli::try_parse_from(["citecrawl", "seed", "--file", "seeds.csv"]).unwrap();
        assert!(matches!(cli.command, Command::Seed { file } if file == PathBuf::from("seeds.csv")));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_parse_work_flags() {
        let cli = Cli::try_parse_from([
            "citecrawl",
            "work",
            "--max-depth",
            "-1",
            "--politeness-ms",
            "0",
            "--max-concurrent-fetches",
            "2",
            "--exit-when-idle",
            "--config",
            "config/test.toml",
        ])
        .unwrap();

        let Command::Work(args) = cli.command else {
            panic!("expected work");
        };
        assert_eq!(args.max_depth, Some(-1));
        assert_eq!(args.politeness_ms, Some(0));
        assert_eq!(args.max_concurrent_fetches, Some(2));
        assert!(args.exit_when_idle);
        assert_eq!(cli.config, Some(PathBuf::from("config/test.toml")));
    }

    #[test]
    fn test_depth_below_minus_one_rejected() {
        assert!(Cli::try_parse_from(["citecrawl", "work", "--max-depth", "-2"]).is_err());
    }

    #[test]
    fn test_apply_overrides_only_given_flags() {
        let mut crawler = CrawlerConfig::default();
        let args = WorkArgs {
            max_depth: Some(5),
            max_in_flight: Some(12),
            ..Default::default()
        };
        args.apply(&mut crawler);

        assert_eq!(crawler.max_depth, 5);
        assert_eq!(crawler.max_in_flight, 12);
        assert_eq!(crawler.politeness_ms, 1500);
        assert_eq!(crawler.max_concurrent_fetches, 5);
    }
}
