use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use deploywin_core::scenario::{format_prs, run_all, standard_scenarios};
use deploywin_core::{
    BumpKind, FileChange, PipelineConfig, PullRequest, Release, ReleaseState, RemoteOps,
    Repository, Sandbox,
};
use prwindow::GitWalker;
use tracing::Level;

#[derive(Parser)]
#[command(name = "deploywin")]
#[command(
    about = "Drive a main/staging/production release pipeline and list the PRs each deploy ships",
    long_about = None
)]
struct Cli {
    /// Pipeline config (defaults to deploywin.toml in the repository)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List PRs delivered between two refs, newest first
    Resolve {
        /// Previously deployed ref
        lower: String,
        /// Ref being deployed
        upper: String,
        /// Path to the repository
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Fetch branches and tags from the remote first
        #[arg(long)]
        fetch: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::List)]
        format: OutputFormat,
    },
    /// Run one release transition against a repository
    Release {
        /// Path to the repository
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[command(subcommand)]
        action: ReleaseAction,
    },
    /// Play the scripted release scenarios in a throwaway sandbox
    Simulate,
}

#[derive(Subcommand)]
enum ReleaseAction {
    /// Merge a PR into main
    MergePr(PrArgs),
    /// Bump the version on main
    Bump {
        #[arg(value_enum, default_value_t = Bump::Patch)]
        kind: Bump,
    },
    /// Reset staging to main
    RecreateStaging,
    /// Reset production to staging and unlock the checklist
    RecreateProduction,
    /// Merge a PR into main and carry it onto staging
    CherryPick(PrArgs),
    /// Tag the current branch with the current version
    Tag,
    /// Lock the checklist
    Lock,
    /// Unlock the checklist
    Unlock,
    /// Show checklist state, version and tags
    Status,
}

#[derive(clap::Args)]
struct PrArgs {
    /// PR number
    id: u64,
    /// Commit message of the PR branch
    #[arg(long)]
    title: Option<String>,
    /// File to write, as PATH=CONTENTS (repeatable)
    #[arg(long = "write", value_parser = parse_write)]
    writes: Vec<FileChange>,
}

impl PrArgs {
    fn into_pull_request(self) -> PullRequest {
        if self.writes.is_empty() {
            let path = format!("changes/pr-{}.txt", self.id);
            let contents = format!("change from PR {}\n", self.id);
            let mut pr = PullRequest::single_file(self.id, &path, &contents);
            if let Some(title) = self.title {
                pr.title = title;
            }
            return pr;
        }
        let title = self.title.unwrap_or_else(|| format!("PR {}", self.id));
        PullRequest::new(self.id, title, self.writes)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Bump {
    Patch,
    Minor,
}

impl From<Bump> for BumpKind {
    fn from(bump: Bump) -> Self {
        match bump {
            Bump::Patch => BumpKind::Patch,
            Bump::Minor => BumpKind::Minor,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// `[ '3', '1' ]`
    List,
    /// JSON array of strings
    Json,
}

fn parse_write(arg: &str) -> std::result::Result<FileChange, String> {
    let (path, contents) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected PATH=CONTENTS, got {arg:?}"))?;
    Ok(FileChange::write(path, format!("{contents}\n")))
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Resolve { lower, upper, repo, fetch, format } => {
            let config = PipelineConfig::load(cli.config.as_deref(), &repo)?;
            if fetch {
                let driver = open_driver(&repo, &config)?;
                driver
                    .fetch()
                    .with_context(|| format!("fetching from {}", config.remote))?;
            }

            let walker = GitWalker::new(Some(repo.as_path()))
                .with_context(|| format!("opening repository at {}", repo.display()))?;
            let prs = walker.resolve_merged_between(&lower, &upper, &config.convention())?;

            match format {
                OutputFormat::List => println!("{}", format_prs(&prs)),
                OutputFormat::Json => {
                    let ids: Vec<String> = prs.iter().map(|pr| pr.to_string()).collect();
                    println!("{}", serde_json::to_string(&ids)?);
                }
            }
        }
        Commands::Release { repo, action } => {
            let config = PipelineConfig::load(cli.config.as_deref(), &repo)?;
            let driver = open_driver(&repo, &config)?;
            let state = ReleaseState::load(driver.git_dir(), &config.branches.main)?;
            let mut release = Release::new(&driver, &config).with_state(state);

            run_release_action(&mut release, action)?;
            release.state().save(driver.git_dir())?;
        }
        Commands::Simulate => {
            let workdir = std::env::current_dir()?;
            let config = PipelineConfig::load(cli.config.as_deref(), &workdir)?;
            let mut sandbox = Sandbox::create(config).context("creating sandbox")?;

            let scenarios = standard_scenarios();
            run_all(&mut sandbox, &scenarios, |scenario| println!("{}", scenario.title))?;
            println!("All {} scenarios passed (run {})", scenarios.len(), sandbox.run_id());
        }
    }

    Ok(())
}

/// Driver over `path`, mirroring to the configured remote when it exists
fn open_driver(path: &Path, config: &PipelineConfig) -> Result<Repository> {
    let driver = Repository::open(path)
        .with_context(|| format!("opening repository at {}", path.display()))?
        .with_identity(config.author.clone());

    if RemoteOps::new(driver.git_repo()).has_remote(&config.remote) {
        Ok(driver.with_remote(&config.remote, Some(config.token_env.as_str()))?)
    } else {
        Ok(driver)
    }
}

fn run_release_action(release: &mut Release<'_>, action: ReleaseAction) -> Result<()> {
    match action {
        ReleaseAction::MergePr(args) => {
            let pr = args.into_pull_request();
            let merge = release.merge_pr(&pr)?;
            println!("Merged PR #{} as {}", pr.id, &merge.to_string()[..8]);
        }
        ReleaseAction::Bump { kind } => {
            let version = release.bump_version(kind.into())?;
            println!("Version is now {version}");
        }
        ReleaseAction::RecreateStaging => {
            release.recreate_staging()?;
            println!("Recreated staging from main");
        }
        ReleaseAction::RecreateProduction => {
            release.recreate_production()?;
            println!("Recreated production from staging");
        }
        ReleaseAction::CherryPick(args) => {
            let pr = args.into_pull_request();
            let commit = release.cherry_pick_to_staging(&pr)?;
            println!("Cherry-picked PR #{} to staging as {}", pr.id, &commit.to_string()[..8]);
        }
        ReleaseAction::Tag => {
            let tag = release.tag_release()?;
            println!("Tagged {} at {}", tag.name, &tag.target.to_string()[..8]);
        }
        ReleaseAction::Lock => {
            release.lock_checklist();
            println!("Checklist locked");
        }
        ReleaseAction::Unlock => {
            release.unlock_checklist();
            println!("Checklist unlocked");
        }
        ReleaseAction::Status => {
            let status = release.status()?;
            println!("Checklist: {}", status.checklist);
            println!("Current branch: {}", status.current_branch);
            println!("Version: {}", status.version);
            println!("Tags: {}", status.tags.join(", "));
        }
    }
    Ok(())
}
