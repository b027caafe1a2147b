//! confplan CLI - planning engine for congress/event programs.
//!
//! Loads a plan file (JSON) into the in-memory store and runs analytical or
//! mutation commands against the planner service, printing JSON results.
//!
//! ## Exit Code Contract
//!
//! | Exit Code | Meaning |
//! |-----------|---------|
//! | 0  | Success |
//! | 2  | Validation error |
//! | 3  | Not found |
//! | 4  | Conflict (locks, duplicate edges, decided actions) |
//! | 5  | Cycle detected |
//! | 6  | Insufficient calibration |
//! | 7  | Cancelled |
//! | 10 | Internal error |
//! | 1  | Anything else (I/O, malformed input file) |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use confplan_core::{ErrorKind, HistoricalSample, PlanError, PlanSnapshot, ProposedChange};
use confplan_service::PlannerService;
use confplan_solver::{CancelToken, CostWeights, SimulationParams};
use confplan_store::MemoryRepository;

#[derive(Parser)]
#[command(name = "confplan")]
#[command(author, version, about = "Congress program planning engine", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plan file: schema, invariants and graph acyclicity
    Check {
        /// Plan file path
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Compute the critical path
    CriticalPath {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Run a Monte Carlo schedule simulation
    Simulate {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Iteration count
        #[arg(short = 'n', long, default_value = "10000")]
        iterations: usize,

        /// RNG seed for reproducible runs
        #[arg(short, long, default_value = "0")]
        seed: u64,

        /// Target event date (YYYY-MM-DD or RFC3339)
        #[arg(long, value_name = "DATE")]
        event_date: Option<String>,
    },

    /// Show attention views: blockers, overdue, due-soon
    Attention {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Preview the impact of a task change
    Impact {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Target task id
        #[arg(short, long)]
        task: String,

        /// Extra duration, in days
        #[arg(long, value_name = "DAYS")]
        slip: Option<f64>,

        /// New due date (YYYY-MM-DD or RFC3339)
        #[arg(long, value_name = "DATE")]
        due: Option<String>,

        /// Also run a seeded preview simulation
        #[arg(long)]
        simulate: bool,
    },

    /// Fused risk intelligence for one task
    Intelligence {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long)]
        task: String,

        /// Include Monte Carlo and Markov sections
        #[arg(long)]
        simulations: bool,
    },

    /// Markov transition matrices and expected completion time
    Markov {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(short, long)]
        task: Option<String>,
    },

    /// Weighted schedule cost breakdown
    Cost {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Weight per estimated task-day
        #[arg(long, default_value = "1.0")]
        per_day: f64,

        /// Flat penalty per blocked task
        #[arg(long, default_value = "2.0")]
        blocked: f64,

        /// Penalty per overdue day
        #[arg(long, default_value = "1.5")]
        overdue: f64,
    },

    /// Aggregated plan status
    Status {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Clone the plan as a template aligned on a new event date
    Clone {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Id of the cloned plan
        #[arg(long)]
        target: String,

        /// Target event date (YYYY-MM-DD or RFC3339)
        #[arg(long, value_name = "DATE")]
        event_date: String,
    },
}

/// On-disk plan fixture: a snapshot plus optional calibration history.
#[derive(Serialize, Deserialize)]
struct PlanFile {
    #[serde(flatten)]
    snapshot: PlanSnapshot,
    #[serde(default)]
    history: Vec<HistoricalSample>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn init_tracing(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Map an error to the exit-code contract.
fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PlanError>().map(PlanError::kind) {
        Some(ErrorKind::Validation) => 2,
        Some(ErrorKind::NotFound) => 3,
        Some(ErrorKind::Conflict) => 4,
        Some(ErrorKind::Cycle) => 5,
        Some(ErrorKind::Calibration) => 6,
        Some(ErrorKind::Cancelled) => 7,
        Some(ErrorKind::Internal) => 10,
        None => 1,
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Check { file } => {
            let (service, plan_id) = load(&file)?;
            let plan = service.get_plan(&plan_id)?;
            let cp = service.get_critical_path(&plan_id)?;
            print_json(&serde_json::json!({
                "plan_id": plan.id,
                "valid": true,
                "diagnostics": cp.diagnostics,
            }))
        }
        Commands::CriticalPath { file } => {
            let (service, plan_id) = load(&file)?;
            print_json(&service.get_critical_path(&plan_id)?)
        }
        Commands::Simulate {
            file,
            iterations,
            seed,
            event_date,
        } => {
            let (service, plan_id) = load(&file)?;
            let mut params = SimulationParams::new(Utc::now())
                .iterations(iterations)
                .seed(seed);
            if let Some(date) = event_date {
                params = params.event_date(parse_instant(&date)?);
            }
            print_json(&service.run_monte_carlo(&plan_id, &params, &CancelToken::new())?)
        }
        Commands::Attention { file } => {
            let (service, plan_id) = load(&file)?;
            print_json(&service.get_attention(&plan_id)?)
        }
        Commands::Impact {
            file,
            task,
            slip,
            due,
            simulate,
        } => {
            let (service, plan_id) = load(&file)?;
            let change = ProposedChange {
                slippage_days: slip,
                due: due.as_deref().map(parse_instant).transpose()?,
                ..ProposedChange::default()
            };
            print_json(&service.analyze_impact(
                &plan_id,
                &task,
                &change,
                simulate,
                &CancelToken::new(),
            )?)
        }
        Commands::Intelligence {
            file,
            task,
            simulations,
        } => {
            let (service, plan_id) = load(&file)?;
            print_json(&service.get_task_intelligence(&plan_id, &task, simulations)?)
        }
        Commands::Markov { file, task } => {
            let (service, plan_id) = load(&file)?;
            print_json(&service.get_markov(&plan_id, task.as_deref())?)
        }
        Commands::Cost {
            file,
            per_day,
            blocked,
            overdue,
        } => {
            let (service, plan_id) = load(&file)?;
            let weights = CostWeights {
                per_task_day: per_day,
                blocked_penalty: blocked,
                overdue_penalty_per_day: overdue,
            };
            print_json(&service.compute_cost(&plan_id, &weights)?)
        }
        Commands::Status { file } => {
            let (service, plan_id) = load(&file)?;
            print_json(&service.get_plan_status(&plan_id)?)
        }
        Commands::Clone {
            file,
            target,
            event_date,
        } => {
            let (service, plan_id) = load(&file)?;
            let event = parse_instant(&event_date)?;
            service.clone_template(&plan_id, &target, event)?;
            let cloned = PlanFile {
                snapshot: service.export_plan(&target)?,
                history: Vec::new(),
            };
            print_json(&cloned)
        }
    }
}

/// Load a plan file into a fresh in-memory service.
fn load(path: &PathBuf) -> Result<(PlannerService, String)> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading plan file {}", path.display()))?;
    let file: PlanFile = serde_json::from_str(&content)
        .with_context(|| format!("parsing plan file {}", path.display()))?;

    for task in &file.snapshot.tasks {
        task.validate()?;
    }

    let repo = Arc::new(MemoryRepository::new());
    repo.seed_history(file.history);
    {
        use confplan_core::Repository;
        let mut tx = repo.begin()?;
        tx.put_plan(file.snapshot.plan.clone())?;
        for bucket in &file.snapshot.buckets {
            tx.put_bucket(&file.snapshot.plan.id, bucket.clone())?;
        }
        for task in &file.snapshot.tasks {
            tx.put_task(&file.snapshot.plan.id, task.clone())?;
        }
        for dep in &file.snapshot.dependencies {
            tx.add_dependency(&file.snapshot.plan.id, dep.clone())?;
        }
        tx.commit()?;
    }

    Ok((PlannerService::new(repo), file.snapshot.plan.id))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Accept both plain dates and full RFC3339 instants.
fn parse_instant(input: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
        return Ok(instant.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{input}' (want YYYY-MM-DD or RFC3339)"))?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid")))
}
