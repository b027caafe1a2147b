//! # confplan-solver
//!
//! Analytical engines over a loaded plan snapshot:
//!
//! - Dependency graph construction with deterministic topological order
//! - Critical Path Method scheduling
//! - Historical PERT calibration
//! - Monte Carlo schedule simulation with assignee contention
//! - Markov state analysis with fundamental-matrix absorption times
//! - Impact previews, task intelligence, attention views and cost models
//!
//! Every engine is a pure function of its inputs: load a [`confplan_core::PlanSnapshot`]
//! once, compute, discard. Long-running computations take a [`CancelToken`].
//!
//! ## Example
//!
//! ```rust
//! use confplan_core::{Dependency, Plan, PlanSnapshot, Task};
//! use confplan_solver::{cpm, graph::TaskGraph};
//!
//! let snapshot = PlanSnapshot {
//!     plan: Plan::new("congress", "Congress"),
//!     buckets: Vec::new(),
//!     tasks: vec![Task::new("a", "Book venue"), Task::new("b", "Send invites")],
//!     dependencies: vec![Dependency::new("a", "b")],
//! };
//! let graph = TaskGraph::build(&snapshot).unwrap();
//! let schedule = cpm::compute(&snapshot, &graph, &cpm::DurationModel::default());
//! assert_eq!(schedule.canonical_path, vec!["a", "b"]);
//! ```

pub mod attention;
pub mod cancel;
pub mod cost;
pub mod cpm;
pub mod graph;
pub mod history;
pub mod impact;
pub mod intelligence;
pub mod linalg;
pub mod markov;
pub mod montecarlo;

pub use attention::{AttentionReport, AttentionView, MilestoneAnalysis, TaskRef};
pub use cancel::CancelToken;
pub use cost::{CostBreakdown, CostWeights};
pub use cpm::{CpmResult, CpmSchedule, DurationModel};
pub use graph::{GraphDiagnostic, TaskGraph};
pub use history::{calibrate, Calibration, CalibrationConfig, DependencyHint};
pub use impact::{ImpactReport, SimulatedImpact};
pub use intelligence::{IntelligenceBundle, RiskLevel};
pub use markov::{absorption_analysis, detect_state, learn_matrix, AbsorptionAnalysis};
pub use montecarlo::{simulate, EndDistribution, SimulationOutcome, SimulationParams};
