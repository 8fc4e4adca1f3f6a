//! Scripted release runs checked against the PR-window resolver.

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::commit::FileChange;
use crate::release::{BumpKind, PullRequest, Release};
use crate::sandbox::Sandbox;
use prwindow::{GitWalker, PrId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    MergePr(PullRequest),
    CherryPick(PullRequest),
    Bump(BumpKind),
    RecreateStaging,
    RecreateProduction,
    Lock,
    Unlock,
    Tag,
    /// Resolve `lower..upper` and compare against `prs`, newest first
    Expect {
        lower: String,
        upper: String,
        prs: Vec<u64>,
    },
}

impl Step {
    /// A PR adding its own file, so merges never conflict
    pub fn merge(id: u64) -> Self {
        Step::MergePr(feature_pr(id))
    }

    pub fn cherry_pick(id: u64) -> Self {
        Step::CherryPick(feature_pr(id))
    }

    pub fn expect(lower: &str, upper: &str, prs: &[u64]) -> Self {
        Step::Expect {
            lower: lower.to_string(),
            upper: upper.to_string(),
            prs: prs.to_vec(),
        }
    }
}

fn feature_pr(id: u64) -> PullRequest {
    PullRequest::single_file(id, &format!("changes/pr-{id}.txt"), &format!("change from PR {id}\n"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub title: String,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn new(title: impl Into<String>, steps: Vec<Step>) -> Self {
        Scenario {
            title: title.into(),
            steps,
        }
    }
}

/// The release flows exercised by `deploywin simulate`
pub fn standard_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::new(
            "PR merged, bumped and staged",
            vec![
                Step::merge(1),
                Step::Bump(BumpKind::Patch),
                Step::RecreateStaging,
                Step::Tag,
                Step::expect("1.0.0", "1.0.1", &[1]),
                Step::expect("1.0.1", "1.0.1", &[]),
            ],
        ),
        Scenario::new(
            "Release cycle with a cherry-pick and a production promotion",
            vec![
                Step::merge(1),
                Step::Bump(BumpKind::Patch),
                Step::RecreateStaging,
                Step::Tag,
                Step::expect("1.0.0", "1.0.1", &[1]),
                Step::Lock,
                Step::merge(2),
                Step::cherry_pick(3),
                Step::Tag,
                Step::expect("1.0.0", "1.0.2", &[3, 1]),
                Step::expect("1.0.1", "1.0.2", &[3]),
                Step::RecreateProduction,
                Step::expect("1.0.0", "1.0.2", &[3, 1]),
                Step::expect("1.0.0", "production", &[3, 1]),
                Step::Bump(BumpKind::Minor),
                Step::RecreateStaging,
                Step::Tag,
                Step::expect("1.0.2", "1.1.0", &[2]),
                Step::expect("1.0.0", "1.1.0", &[3, 2, 1]),
            ],
        ),
        Scenario::new(
            "Disjoint merges",
            (1..=5)
                .map(Step::merge)
                .chain([
                    Step::Bump(BumpKind::Patch),
                    Step::RecreateStaging,
                    Step::Tag,
                    Step::expect("1.0.0", "1.0.1", &[5, 4, 3, 2, 1]),
                ])
                .collect(),
        ),
        Scenario::new(
            "Revert and reapply stay distinct",
            vec![
                Step::MergePr(PullRequest::new(
                    5,
                    "Add banner",
                    vec![FileChange::write("banner.txt", "hello\n")],
                )),
                Step::MergePr(PullRequest::new(
                    6,
                    "Revert \"Add banner\"",
                    vec![FileChange::delete("banner.txt")],
                )),
                Step::MergePr(PullRequest::new(
                    7,
                    "Add banner again",
                    vec![FileChange::write("banner.txt", "hello\n")],
                )),
                Step::Bump(BumpKind::Patch),
                Step::RecreateStaging,
                Step::Tag,
                Step::expect("1.0.0", "1.0.1", &[7, 6, 5]),
            ],
        ),
        Scenario::new(
            "Cherry-picked PR is not repeated after staging recreation",
            vec![
                Step::Lock,
                Step::merge(2),
                Step::cherry_pick(3),
                Step::Tag,
                Step::expect("1.0.0", "1.0.1", &[3]),
                Step::RecreateProduction,
                Step::Unlock,
                Step::Bump(BumpKind::Patch),
                Step::RecreateStaging,
                Step::Tag,
                Step::expect("1.0.1", "1.0.2", &[2]),
                Step::expect("1.0.0", "1.0.2", &[3, 2]),
            ],
        ),
    ]
}

/// Reset the sandbox and play one scenario
pub fn run_scenario(sandbox: &mut Sandbox, scenario: &Scenario) -> Result<()> {
    sandbox
        .reset_repo_to_initial_state()
        .with_context(|| format!("scenario '{}': reset failed", scenario.title))?;

    let sandbox: &Sandbox = sandbox;
    info!(title = %scenario.title, run_id = %sandbox.run_id(), "running scenario");
    let mut release = sandbox.release();
    for (index, step) in scenario.steps.iter().enumerate() {
        run_step(sandbox, &mut release, step).with_context(|| {
            format!("scenario '{}': step {} ({step:?})", scenario.title, index + 1)
        })?;
    }
    Ok(())
}

/// Play every scenario in order, stopping at the first failure
pub fn run_all(
    sandbox: &mut Sandbox,
    scenarios: &[Scenario],
    mut on_start: impl FnMut(&Scenario),
) -> Result<()> {
    for scenario in scenarios {
        on_start(scenario);
        run_scenario(sandbox, scenario)?;
    }
    Ok(())
}

fn run_step(sandbox: &Sandbox, release: &mut Release<'_>, step: &Step) -> Result<()> {
    match step {
        Step::MergePr(pr) => {
            release.merge_pr(pr)?;
        }
        Step::CherryPick(pr) => {
            release.cherry_pick_to_staging(pr)?;
        }
        Step::Bump(kind) => {
            release.bump_version(*kind)?;
        }
        Step::RecreateStaging => release.recreate_staging()?,
        Step::RecreateProduction => release.recreate_production()?,
        Step::Lock => release.lock_checklist(),
        Step::Unlock => release.unlock_checklist(),
        Step::Tag => {
            release.tag_release()?;
        }
        Step::Expect { lower, upper, prs } => {
            let walker = GitWalker::new(Some(sandbox.repo().path()))?;
            let convention = sandbox.config().convention();
            let actual = walker.resolve_merged_between(lower, upper, &convention)?;
            let expected: Vec<PrId> = prs.iter().copied().map(PrId::from).collect();
            if actual != expected {
                bail!(
                    "expected {lower}..{upper} to deliver {}, got {}",
                    format_prs(&expected),
                    format_prs(&actual)
                );
            }
        }
    }
    Ok(())
}

/// `[ '3', '1' ]`, or `[]` when empty
pub fn format_prs(prs: &[PrId]) -> String {
    if prs.is_empty() {
        return "[]".to_string();
    }
    let quoted: Vec<String> = prs.iter().map(|pr| format!("'{pr}'")).collect();
    format!("[ {} ]", quoted.join(", "))
}
