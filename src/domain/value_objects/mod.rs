pub mod entity_type;
pub mod field_patch;
pub mod local_id;
pub mod queue_entry_id;
pub mod server_id;
pub mod tenant_id;

pub use entity_type::EntityType;
pub use field_patch::FieldPatch;
pub use local_id::LocalId;
pub use queue_entry_id::QueueEntryId;
pub use server_id::ServerId;
pub use tenant_id::TenantId;
