use crate::domain::value_objects::{EntityType, FieldPatch, LocalId, QueueEntryId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Binary payload of a photo or signature; runs after the record exists remotely.
    Upload,
}

impl Operation {
    /// Operations that carry record fields to the remote.
    pub fn is_metadata(&self) -> bool {
        !matches!(self, Operation::Upload)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Upload => "UPLOAD",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Ok(Operation::Create),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            "UPLOAD" => Ok(Operation::Upload),
            other => Err(format!("Unknown queue operation: {other}")),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    /// Waiting for the next push (possibly not before `next_attempt_at`).
    Pending,
    /// Handed to the remote service by the running cycle.
    InFlight,
    /// Terminal. Needs a user decision: retry or discard.
    Failed,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEntryStatus::Pending => "pending",
            QueueEntryStatus::InFlight => "in_flight",
            QueueEntryStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "pending" => Ok(QueueEntryStatus::Pending),
            "in_flight" => Ok(QueueEntryStatus::InFlight),
            "failed" => Ok(QueueEntryStatus::Failed),
            other => Err(format!("Unknown queue status: {other}")),
        }
    }
}

impl fmt::Display for QueueEntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local mutation waiting for remote acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: QueueEntryId,
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub entity_id: LocalId,
    pub operation: Operation,
    /// Field diff for UPDATE, full snapshot for CREATE, `None` for DELETE
    /// and UPLOAD.
    pub payload: Option<FieldPatch>,
    pub priority: u8,
    pub status: QueueEntryStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn is_terminal(&self) -> bool {
        self.status == QueueEntryStatus::Failed
    }

    pub fn entity_key(&self) -> (EntityType, LocalId) {
        (self.entity_type, self.entity_id)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueEntry {
    pub tenant_id: TenantId,
    pub entity_type: EntityType,
    pub entity_id: LocalId,
    pub operation: Operation,
    pub payload: Option<FieldPatch>,
    /// Falls back to the entity type's default tier.
    pub priority: Option<u8>,
}

impl NewQueueEntry {
    pub fn new(
        tenant_id: TenantId,
        entity_type: EntityType,
        entity_id: LocalId,
        operation: Operation,
        payload: Option<FieldPatch>,
    ) -> Self {
        Self {
            tenant_id,
            entity_type,
            entity_id,
            operation,
            payload,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn effective_priority(&self) -> u8 {
        self.priority
            .unwrap_or_else(|| self.entity_type.default_priority())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_and_status_round_trip_their_column_values() {
        for op in [
            Operation::Create,
            Operation::Update,
            Operation::Delete,
            Operation::Upload,
        ] {
            assert_eq!(Operation::parse(op.as_str()).unwrap(), op);
        }
        for status in [
            QueueEntryStatus::Pending,
            QueueEntryStatus::InFlight,
            QueueEntryStatus::Failed,
        ] {
            assert_eq!(QueueEntryStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(Operation::parse("UPSERT").is_err());
    }

    #[test]
    fn new_entry_uses_entity_default_priority() {
        let tenant = TenantId::new("acme".into()).unwrap();
        let entry = NewQueueEntry::new(
            tenant.clone(),
            EntityType::Customer,
            LocalId::generate(),
            Operation::Create,
            None,
        );
        assert_eq!(entry.effective_priority(), 30);
        let bumped = NewQueueEntry::new(
            tenant,
            EntityType::Photo,
            LocalId::generate(),
            Operation::Delete,
            None,
        )
        .with_priority(99);
        assert_eq!(bumped.effective_priority(), 99);
    }
}
