use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use strand_commit::AncestorStrategy;
use strand_types::Address;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "strand",
    about = "Inspect and replicate Strand chunk stores",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Copy everything reachable from the given addresses into another store
    Pull(PullArgs),
    /// Find the best common ancestor of two commits
    MergeBase(MergeBaseArgs),
    /// List a commit and its ancestors, tallest first
    Log(LogArgs),
    /// Describe a single chunk
    Show(ShowArgs),
}

#[derive(Args, Debug)]
pub struct PullArgs {
    /// Source store directory
    #[arg(long)]
    pub from: PathBuf,
    /// Destination store directory (created if missing)
    #[arg(long)]
    pub to: PathBuf,
    /// Puller settings in TOML
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// File of archived source addresses, one hex address per line
    #[arg(long)]
    pub ghosts: Option<PathBuf>,
    #[arg(required = true)]
    pub wants: Vec<Address>,
}

#[derive(Args, Debug)]
pub struct MergeBaseArgs {
    /// Store holding the first commit
    #[arg(long)]
    pub store: PathBuf,
    /// Store holding the second commit (defaults to --store)
    #[arg(long)]
    pub other: Option<PathBuf>,
    #[arg(long, default_value_t = AncestorStrategy::Auto)]
    pub strategy: AncestorStrategy,
    pub first: Address,
    pub second: Address,
}

#[derive(Args, Debug)]
pub struct LogArgs {
    #[arg(long)]
    pub store: PathBuf,
    /// Commit or tag to start from
    pub address: Address,
    /// Stop after this many commits
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    #[arg(long)]
    pub store: PathBuf,
    pub address: Address,
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0101010101010101010101010101010101010101010101010101010101010101";
    const B: &str = "0202020202020202020202020202020202020202020202020202020202020202";

    #[test]
    fn parses_pull() {
        let cli = Cli::try_parse_from([
            "strand", "pull", "--from", "/src", "--to", "/dst", "--config", "pull.toml", A, B,
        ])
        .unwrap();
        let Command::Pull(args) = cli.command else {
            panic!("expected pull");
        };
        assert_eq!(args.from, PathBuf::from("/src"));
        assert_eq!(args.config, Some(PathBuf::from("pull.toml")));
        assert_eq!(args.wants.len(), 2);
    }

    #[test]
    fn pull_needs_an_address() {
        assert!(Cli::try_parse_from(["strand", "pull", "--from", "a", "--to", "b"]).is_err());
    }

    #[test]
    fn parses_merge_base_strategy() {
        let cli = Cli::try_parse_from([
            "strand",
            "merge-base",
            "--store",
            "s",
            "--strategy",
            "set-closure",
            A,
            B,
        ])
        .unwrap();
        let Command::MergeBase(args) = cli.command else {
            panic!("expected merge-base");
        };
        assert_eq!(args.strategy, AncestorStrategy::SetClosure);
        assert!(args.other.is_none());
    }

    #[test]
    fn rejects_bad_address_and_strategy() {
        assert!(Cli::try_parse_from(["strand", "show", "--store", "s", "xyz"]).is_err());
        assert!(Cli::try_parse_from([
            "strand", "merge-base", "--store", "s", "--strategy", "bogus", A, B
        ])
        .is_err());
    }

    #[test]
    fn verbosity_counts() {
        let quiet = Cli::try_parse_from(["strand", "show", "--store", "s", A]).unwrap();
        assert_eq!(quiet.log_level(), Level::WARN);
        let loud = Cli::try_parse_from(["strand", "-vv", "show", "--store", "s", A]).unwrap();
        assert_eq!(loud.log_level(), Level::DEBUG);
    }
}
