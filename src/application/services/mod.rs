pub mod attachment_uploader;
pub mod reconciler;
pub mod record_service;
pub mod retry_policy;
pub mod sync_service;

pub use attachment_uploader::{AttachmentUploader, UploadReport};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use record_service::RecordService;
pub use retry_policy::RetryPolicy;
pub use sync_service::{
    CycleOutcome, CycleReport, SkipReason, Subscription, SyncComponents, SyncOrchestrator,
    SyncScheduler, SyncSettings,
};
