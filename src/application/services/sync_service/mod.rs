pub mod core;
mod pull;
mod push;
pub mod scheduler;
pub mod status;

pub use self::core::{
    CycleOutcome, CycleReport, SkipReason, SyncComponents, SyncOrchestrator, SyncSettings,
};
pub use scheduler::SyncScheduler;
pub use status::{Subscription, SyncStatusHandle};
