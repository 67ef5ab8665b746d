use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "batchflow", version, about = "Run the daily transaction pipeline")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file; defaults to ~/.batchflow/config.toml, then ./batchflow.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Raw transaction file, overriding `source.path`.
    #[arg(long, global = true)]
    pub source: Option<String>,

    /// Warehouse url, overriding `warehouse.url`.
    #[arg(long, global = true)]
    pub database_url: Option<String>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct RunArgs {
    /// Print the full report as JSON instead of the headline.
    #[arg(long)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ScheduleArgs {
    /// Seconds between run starts.
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub every_secs: u64,

    /// Stop after this many runs.
    #[arg(long)]
    pub max_runs: Option<u32>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute the pipeline once.
    Run(RunArgs),
    /// Validate the source and print the quality ledger without loading.
    Validate,
    /// Execute the pipeline on a fixed interval, one run at a time.
    Schedule(ScheduleArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_schedule_with_global_overrides() {
        let args = Args::try_parse_from([
            "batchflow",
            "schedule",
            "--every-secs",
            "60",
            "--max-runs",
            "3",
            "--source",
            "tx.csv",
        ])
        .unwrap();

        assert_eq!(args.source.as_deref(), Some("tx.csv"));
        match args.command {
            Commands::Schedule(s) => {
                assert_eq!(s.every_secs, 60);
                assert_eq!(s.max_runs, Some(3));
                assert!(!s.json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Args::try_parse_from(["batchflow", "schedule", "--every-secs", "0"]).is_err());
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Args::try_parse_from(["batchflow"]).is_err());
    }
}
