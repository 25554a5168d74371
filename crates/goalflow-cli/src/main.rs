//! CLI binary for validating and simulating Goalflow goal-set plans.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use goalflow_engine::{
    executor_fn, latest_goal_set, retrying, EventBus, Goal, GoalDefinition, GoalExecutor,
    GoalMachine, GoalSet, GoalflowConfig, Implementation, InMemoryGoalEventStore,
};
use goalflow_types::{ChangeRef, Environment, ExecuteGoalResult, GoalSetState, GoalflowError};

#[derive(Parser)]
#[command(name = "goalflow", version, about = "Goal orchestration for delivery pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a goal-set plan file
    Validate {
        /// Path to the plan .json file
        plan: PathBuf,
    },

    /// Run a plan end-to-end against the in-memory store with scripted executors
    Simulate {
        /// Path to the plan .json file
        plan: PathBuf,

        /// Machine configuration (.json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Give up waiting for the goal-set after this many seconds
        #[arg(long, default_value = "30")]
        timeout_secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Plan file
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PlanFile {
    #[serde(default = "default_plan_name")]
    name: String,
    #[serde(default)]
    change: Option<ChangeRef>,
    goals: Vec<GoalEntry>,
}

fn default_plan_name() -> String {
    "default".into()
}

#[derive(Debug, Deserialize)]
struct GoalEntry {
    name: String,
    #[serde(default)]
    environment: Environment,
    /// Names of goals declared earlier in the file.
    #[serde(default)]
    preconditions: Vec<String>,
    /// `success`, `failure` or `flaky:<n>`.
    #[serde(default = "default_executor")]
    executor: String,
    #[serde(default)]
    approval_required: bool,
    #[serde(default)]
    retry_feasible: bool,
}

fn default_executor() -> String {
    "success".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Success,
    Failure,
    /// Fails this many times before succeeding.
    Flaky(u32),
}

impl Script {
    fn parse(text: &str) -> anyhow::Result<Self> {
        match text.split_once(':') {
            None if text == "success" => Ok(Script::Success),
            None if text == "failure" => Ok(Script::Failure),
            Some(("flaky", n)) => Ok(Script::Flaky(
                n.parse().with_context(|| format!("invalid flaky count '{n}'"))?,
            )),
            _ => bail!("unknown executor '{text}' (expected success, failure or flaky:<n>)"),
        }
    }

    fn executor(self) -> Arc<dyn GoalExecutor> {
        match self {
            Script::Success => executor_fn(|_inv| async { Ok(ExecuteGoalResult::success()) }),
            Script::Failure => {
                executor_fn(|_inv| async { Ok(ExecuteGoalResult::failed(1, "scripted failure")) })
            }
            Script::Flaky(failures) => {
                let attempts = Arc::new(AtomicU32::new(0));
                executor_fn(move |inv| {
                    let attempts = attempts.clone();
                    async move {
                        let n = attempts.fetch_add(1, Ordering::SeqCst);
                        inv.progress.write(format!("attempt {}", n + 1)).await;
                        if n < failures {
                            Err(GoalflowError::Other(format!("flaky failure {}", n + 1)))
                        } else {
                            Ok(ExecuteGoalResult::success())
                        }
                    }
                })
            }
        }
    }
}

fn load_plan(path: &Path) -> anyhow::Result<PlanFile> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read plan {}", path.display()))?;
    let plan = serde_json::from_str(&source)
        .with_context(|| format!("failed to parse plan {}", path.display()))?;
    Ok(plan)
}

/// Build goals in declaration order. `root_preconditions` are added to every
/// goal that declares none.
fn build_goals(
    plan: &PlanFile,
    root_preconditions: &[Goal],
) -> anyhow::Result<Vec<(Goal, Script)>> {
    let mut built: Vec<(Goal, Script)> = Vec::new();
    let mut by_name: HashMap<String, Goal> = HashMap::new();

    for entry in &plan.goals {
        let definition = GoalDefinition::new(&entry.name, entry.environment)?
            .approval_required(entry.approval_required)
            .retry_feasible(entry.retry_feasible);

        let mut preconditions = Vec::new();
        for name in &entry.preconditions {
            let key = goalflow_engine::normalize_goal_name(name)?;
            match by_name.get(&key) {
                Some(goal) => preconditions.push(goal.clone()),
                None => bail!(
                    "goal '{}' depends on '{}', which is not declared before it",
                    entry.name,
                    name
                ),
            }
        }
        if preconditions.is_empty() {
            preconditions.extend(root_preconditions.iter().cloned());
        }

        let goal = Goal::with_preconditions(definition, preconditions);
        if by_name.contains_key(goal.unique_name()) {
            return Err(GoalflowError::DuplicateGoal {
                unique_name: goal.unique_name().to_string(),
            }
            .into());
        }
        let script = Script::parse(&entry.executor)
            .with_context(|| format!("goal '{}'", entry.name))?;
        by_name.insert(goal.unique_name().to_string(), goal.clone());
        built.push((goal, script));
    }
    Ok(built)
}

fn plan_change(plan: &PlanFile) -> ChangeRef {
    plan.change.clone().unwrap_or_else(|| ChangeRef {
        owner: "local".into(),
        repo: "workspace".into(),
        branch: "main".into(),
        sha: "HEAD".into(),
    })
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Validate { plan } => cmd_validate(&plan)?,
        Commands::Simulate {
            plan,
            config,
            timeout_secs,
        } => cmd_simulate(&plan, config.as_deref(), timeout_secs).await?,
    }

    Ok(())
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let plan = load_plan(path)?;
    let goals = match build_goals(&plan, &[]) {
        Ok(goals) => goals,
        Err(e) => {
            println!("[ERROR] {e:#}");
            std::process::exit(1);
        }
    };

    println!("Plan '{}' is valid: {} goals", plan.name, goals.len());
    for (goal, script) in &goals {
        let preconditions: Vec<_> = goal.preconditions().iter().map(|p| p.unique_name()).collect();
        println!(
            "  {} [{}] executor={:?} after=[{}]",
            goal.unique_name(),
            goal.environment(),
            script,
            preconditions.join(", ")
        );
    }
    Ok(())
}

async fn cmd_simulate(path: &Path, config: Option<&Path>, timeout_secs: u64) -> anyhow::Result<()> {
    let plan = load_plan(path)?;
    let config = match config {
        Some(p) => GoalflowConfig::load(p)
            .with_context(|| format!("failed to load config {}", p.display()))?,
        None => GoalflowConfig::default(),
    };
    let retry_policy = config.retry.policy();

    let bus = EventBus::new(config.event_bus_capacity);
    let receiver = bus.subscribe();
    let store = Arc::new(InMemoryGoalEventStore::with_bus(bus));
    let mut machine = GoalMachine::new(config, store.clone())?;

    let queue_goal = machine.queue().map(|q| q.goal().clone());
    let roots: Vec<Goal> = queue_goal.iter().cloned().collect();
    let goals = build_goals(&plan, &roots)?;

    let mut goal_set = GoalSet::new(plan.name.clone());
    if let Some(queue) = queue_goal {
        goal_set = goal_set.with_goal(queue)?;
    }
    for (goal, script) in &goals {
        let executor = match script {
            Script::Flaky(_) => retrying(
                goal.unique_name(),
                script.executor(),
                retry_policy.clone(),
            ),
            _ => script.executor(),
        };
        machine.add_implementation(Implementation::new(goal.unique_name(), goal, executor))?;
        goal_set = goal_set.with_goal(goal.clone())?;
    }

    tracing::debug!(goals = goals.len(), "Registered plan goals");

    let machine = Arc::new(machine);
    tokio::spawn(machine.clone().run(receiver));

    let change = plan_change(&plan);
    println!("Simulating goal-set '{}' for {}", plan.name, change);
    let planned = machine.plan(&goal_set, &change).await?;
    let goal_set_id = planned.record.goal_set_id.clone();

    let outcome = tokio::time::timeout(Duration::from_secs(timeout_secs), async {
        loop {
            match latest_goal_set(store.as_ref(), &goal_set_id).await {
                Ok(Some(record)) if record.state != GoalSetState::InProcess => {
                    return Ok(record.state)
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
                Err(e) => return Err(e),
            }
        }
    })
    .await;

    let view = machine.goal_set_view(&goal_set_id).await?;
    for goal in view.goals() {
        println!(
            "  {:<24} {}/{}  {}",
            goal.state.as_str(),
            goal.environment,
            goal.unique_name,
            goal.description
        );
    }

    match outcome {
        Ok(Ok(GoalSetState::Success)) => {
            println!("Goal-set {goal_set_id} succeeded");
            Ok(())
        }
        Ok(Ok(state)) => {
            println!("Goal-set {goal_set_id} finished with {state:?}");
            std::process::exit(1);
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            println!("Goal-set {goal_set_id} did not finish within {timeout_secs}s");
            std::process::exit(2);
        }
    }
}
