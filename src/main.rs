use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use prindex::areas::repository::Repository;
use prindex::artifacts::diff::tree_diff::DiffFilter;
use prindex::artifacts::indexer::config::IndexerConfig;
use prindex::artifacts::log::rev_list::WalkMode;
use prindex::artifacts::pulls::source::JsonPullRequestSource;
use prindex::commands::porcelain::index::OutputFormat;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "prindex",
    version = "0.1.0",
    author = "Sami Barbut-Dica",
    about = "Find the files changed by pull requests",
    long_about = "This tool associates pull requests with the files they change. \
    It reads commits straight from a local clone's object store, finds where each \
    pull request was forked from and diffs that commit against the pull request head.",
    help_template = r"
{name} {version} - {about}

USAGE:
    {usage}

OPTIONS:
    {all-args}
",
)]
struct Cli {
    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v info, -vv debug, -vvv trace)"
    )]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RepoArg {
    #[arg(
        short,
        long,
        env = "PRINDEX_REPO",
        default_value = ".",
        help = "Path to the cloned repository (work tree or bare)"
    )]
    repo: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    #[command(
        name = "index",
        about = "Annotate pull requests with the files they change",
        long_about = "This command reads a JSON list of pull requests and, for each of them, \
        lists the files changed between the merge base of head and base and the head commit. \
        Pull requests that cannot be indexed are reported without stopping the others."
    )]
    Index {
        #[command(flatten)]
        repo: RepoArg,
        #[arg(short, long, help = "JSON file with the pull requests, or - for stdin")]
        pulls: PathBuf,
        #[arg(short, long, env = "PRINDEX_JOBS", help = "Pull requests indexed in parallel")]
        jobs: Option<usize>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json, help = "Output format")]
        format: OutputFormat,
        #[arg(long, help = "owner/name of the hosted repository, used to print links")]
        slug: Option<String>,
    },
    #[command(
        name = "merge-base",
        about = "Print the best common ancestor of two commits",
        long_about = "This command prints the merge base of two commits. \
        It fails when the commits are unrelated or have more than one merge base, unless --all is given."
    )]
    MergeBase {
        #[command(flatten)]
        repo: RepoArg,
        #[arg(index = 1)]
        first: String,
        #[arg(index = 2)]
        second: String,
        #[arg(short, long, help = "Print every best common ancestor")]
        all: bool,
    },
    #[command(
        name = "rev-list",
        about = "List the commits between a commit and one of its ancestors",
        long_about = "This command lists the commits reachable from START but not from TARGET, \
        newest first. It fails when TARGET is not an ancestor of START."
    )]
    RevList {
        #[command(flatten)]
        repo: RepoArg,
        #[arg(index = 1)]
        start: String,
        #[arg(index = 2)]
        target: String,
        #[arg(long, help = "Follow only the first parent of merge commits")]
        first_parent: bool,
    },
    #[command(
        name = "diff-tree",
        about = "List the paths changed between two commits or trees"
    )]
    DiffTree {
        #[command(flatten)]
        repo: RepoArg,
        #[arg(index = 1)]
        old: String,
        #[arg(index = 2)]
        new: String,
        #[arg(long, help = "Prefix each path with its change status (A, D or M)")]
        name_status: bool,
        #[arg(long, value_parser = parse_diff_filter, help = "Only show the given change kinds, e.g. AM")]
        diff_filter: Option<DiffFilter>,
    },
}

fn parse_diff_filter(value: &str) -> Result<DiffFilter, String> {
    DiffFilter::try_parse(value).ok_or_else(|| format!("invalid diff filter: {value}"))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("prindex={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_repository(repo: &RepoArg) -> Result<Repository> {
    Ok(Repository::open(&repo.repo, Box::new(std::io::stdout()))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Index {
            repo,
            pulls,
            jobs,
            format,
            slug,
        } => {
            let repository = open_repository(repo)?;
            let mut source = JsonPullRequestSource::from_arg(pulls);
            let config = IndexerConfig::default().with_jobs(*jobs);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupted, finishing pull requests already started");
                    on_interrupt.cancel();
                }
            });

            repository
                .index(&mut source, config, *format, slug.as_deref(), cancel)
                .await?;
        }
        Commands::MergeBase {
            repo,
            first,
            second,
            all,
        } => {
            let repository = open_repository(repo)?;

            repository.merge_base(first, second, *all)?
        }
        Commands::RevList {
            repo,
            start,
            target,
            first_parent,
        } => {
            let repository = open_repository(repo)?;
            let mode = if *first_parent {
                WalkMode::FirstParent
            } else {
                WalkMode::AllParents
            };

            repository.rev_list(start, target, mode)?
        }
        Commands::DiffTree {
            repo,
            old,
            new,
            name_status,
            diff_filter,
        } => {
            let repository = open_repository(repo)?;

            repository.diff_tree(old, new, *name_status, *diff_filter)?
        }
    }

    Ok(())
}
