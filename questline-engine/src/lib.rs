//! questline-engine: storage seam, collaborator seam, the request-path
//! `Coach` service and the scheduled batch runner.

pub mod authoring;
pub mod coach;
pub mod config;
pub mod scheduler;
pub mod store;

pub use authoring::{call_collaborator, Authoring, CollaboratorPolicy, ExponentialBackoff};
pub use coach::{
    Coach, CompletionOutcome, DailyStatus, GoalSetup, GoalSweep, IngestOutcome, MilestoneUpdate,
    NextMilestone, RegenerationOutcome,
};
pub use config::EngineConfig;
pub use scheduler::{BatchError, BatchResult, Scheduler, SchedulerConfig, TickHooks, TickReport};
pub use store::{Changeset, MemoryStore, Store, StoreError, StoreResult};
