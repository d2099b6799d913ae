pub mod fields;
pub mod queue_entry;
pub mod record;
pub mod sync_state;

pub use fields::{
    AddressFields, ChecklistFields, ChecklistItem, CustomerFields, JobFields, LineItemFields,
    PhotoFields, SignatureFields, TimeEntryFields,
};
pub use queue_entry::{NewQueueEntry, Operation, QueueEntry, QueueEntryStatus};
pub use record::{DirtyFields, LocalMutation, PendingUpload, Record, RecordData};
pub use sync_state::{SyncState, SyncStatus};
