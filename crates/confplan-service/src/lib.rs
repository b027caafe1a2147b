//! # confplan-service
//!
//! The request-level planner API: transactional mutations under advisory
//! locks, the external-event approval workflow, fingerprint-guarded result
//! caching, and the [`PlannerService`] facade a transport mounts.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use confplan_core::{Plan, Task};
//! use confplan_service::PlannerService;
//! use confplan_store::MemoryRepository;
//!
//! let service = PlannerService::new(Arc::new(MemoryRepository::new()));
//! service.create_plan(Plan::new("congress", "Congress 2026")).unwrap();
//! service
//!     .create_task("congress", Task::new("t1", "Book venue"), "alice")
//!     .unwrap();
//! assert_eq!(service.get_tasks("congress").unwrap().len(), 1);
//! ```

pub mod api;
pub mod cache;
pub mod locks;
pub mod mutation;
pub mod workflow;

pub use api::{
    CriticalPathResponse, DependenciesResponse, ImpactResponse, MarkovResponse,
    MonteCarloResponse, PlanStatusResponse, PlannerService, StatusIndicator,
};
pub use cache::MemoCache;
pub use locks::LockManager;
pub use mutation::MutationCore;
pub use workflow::{ActionDraft, EventRule, EventWorkflow, RuleRegistry};
