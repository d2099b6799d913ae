use super::fields::{
    AddressFields, ChecklistFields, CustomerFields, DEVICE_ONLY_FIELDS, JobFields,
    LineItemFields, MergeRemote, PhotoFields, SignatureFields, TimeEntryFields,
};
use crate::domain::value_objects::{EntityType, FieldPatch, LocalId, ServerId, TenantId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Typed payload of a record, one variant per entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "fields", rename_all = "snake_case")]
pub enum RecordData {
    Customer(CustomerFields),
    Address(AddressFields),
    Job(JobFields),
    LineItem(LineItemFields),
    Checklist(ChecklistFields),
    Photo(PhotoFields),
    Signature(SignatureFields),
    TimeEntry(TimeEntryFields),
}

/// Binary payload that still has to reach the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingUpload {
    pub local_path: String,
    pub content_type: String,
}

impl RecordData {
    pub fn entity_type(&self) -> EntityType {
        match self {
            RecordData::Customer(_) => EntityType::Customer,
            RecordData::Address(_) => EntityType::Address,
            RecordData::Job(_) => EntityType::Job,
            RecordData::LineItem(_) => EntityType::LineItem,
            RecordData::Checklist(_) => EntityType::Checklist,
            RecordData::Photo(_) => EntityType::Photo,
            RecordData::Signature(_) => EntityType::Signature,
            RecordData::TimeEntry(_) => EntityType::TimeEntry,
        }
    }

    /// Builds the typed variant for `entity_type` from a bare field object.
    pub fn from_fields(entity_type: EntityType, fields: Value) -> Result<Self, serde_json::Error> {
        Ok(match entity_type {
            EntityType::Customer => RecordData::Customer(serde_json::from_value(fields)?),
            EntityType::Address => RecordData::Address(serde_json::from_value(fields)?),
            EntityType::Job => RecordData::Job(serde_json::from_value(fields)?),
            EntityType::LineItem => RecordData::LineItem(serde_json::from_value(fields)?),
            EntityType::Checklist => RecordData::Checklist(serde_json::from_value(fields)?),
            EntityType::Photo => RecordData::Photo(serde_json::from_value(fields)?),
            EntityType::Signature => RecordData::Signature(serde_json::from_value(fields)?),
            EntityType::TimeEntry => RecordData::TimeEntry(serde_json::from_value(fields)?),
        })
    }

    /// The bare field object, as stored in the `data` column.
    pub fn to_fields(&self) -> Result<Value, serde_json::Error> {
        match self {
            RecordData::Customer(f) => serde_json::to_value(f),
            RecordData::Address(f) => serde_json::to_value(f),
            RecordData::Job(f) => serde_json::to_value(f),
            RecordData::LineItem(f) => serde_json::to_value(f),
            RecordData::Checklist(f) => serde_json::to_value(f),
            RecordData::Photo(f) => serde_json::to_value(f),
            RecordData::Signature(f) => serde_json::to_value(f),
            RecordData::TimeEntry(f) => serde_json::to_value(f),
        }
    }

    /// Full snapshot used as a CREATE payload.
    pub fn to_snapshot(&self) -> Result<FieldPatch, serde_json::Error> {
        let value = self.to_fields()?;
        FieldPatch::new(value).map_err(serde::ser::Error::custom)
    }

    /// Applies a local field diff. Unknown field names and ill-typed values
    /// are rejected; `self` is left untouched on error.
    pub fn apply_patch(&mut self, patch: &FieldPatch) -> Result<(), String> {
        let mut fields = match self.to_fields().map_err(|e| e.to_string())? {
            Value::Object(map) => map,
            _ => return Err("record fields must serialize to an object".to_string()),
        };

        for (key, value) in patch.as_map() {
            if !fields.contains_key(key) {
                return Err(format!(
                    "unknown field '{key}' for {}",
                    self.entity_type()
                ));
            }
            fields.insert(key.clone(), value.clone());
        }

        let updated = RecordData::from_fields(self.entity_type(), Value::Object(fields))
            .map_err(|e| format!("invalid field value: {e}"))?;
        *self = updated;
        Ok(())
    }

    /// Remote-wins merge that keeps every field in `dirty`.
    pub fn merge_remote(&mut self, remote: RecordData, dirty: &DirtyFields) -> Result<(), String> {
        match (self, remote) {
            (RecordData::Customer(local), RecordData::Customer(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (RecordData::Address(local), RecordData::Address(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (RecordData::Job(local), RecordData::Job(remote)) => local.merge_remote(remote, dirty),
            (RecordData::LineItem(local), RecordData::LineItem(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (RecordData::Checklist(local), RecordData::Checklist(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (RecordData::Photo(local), RecordData::Photo(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (RecordData::Signature(local), RecordData::Signature(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (RecordData::TimeEntry(local), RecordData::TimeEntry(remote)) => {
                local.merge_remote(remote, dirty)
            }
            (local, remote) => {
                return Err(format!(
                    "cannot merge {} into {}",
                    remote.entity_type(),
                    local.entity_type()
                ));
            }
        }
        Ok(())
    }

    pub fn pending_upload(&self) -> Option<PendingUpload> {
        let (remote_url, uploaded, local_path, content_type) = match self {
            RecordData::Photo(f) => (&f.remote_url, f.uploaded, &f.local_path, &f.content_type),
            RecordData::Signature(f) => {
                (&f.remote_url, f.uploaded, &f.local_path, &f.content_type)
            }
            _ => return None,
        };
        if uploaded || remote_url.is_some() {
            return None;
        }
        local_path.as_ref().map(|path| PendingUpload {
            local_path: path.clone(),
            content_type: content_type.clone(),
        })
    }

    pub fn mark_uploaded(&mut self, url: String) {
        match self {
            RecordData::Photo(f) => {
                f.remote_url = Some(url);
                f.uploaded = true;
            }
            RecordData::Signature(f) => {
                f.remote_url = Some(url);
                f.uploaded = true;
            }
            _ => {}
        }
    }
}

/// Strips the fields that must never leave the device.
pub fn outbound_fields(patch: &FieldPatch) -> FieldPatch {
    let mut map = patch.as_map().clone();
    for field in DEVICE_ONLY_FIELDS {
        map.remove(*field);
    }
    FieldPatch::from_map(map)
}

/// Field names still owned by not-yet-acknowledged local operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyFields(HashSet<String>);

impl DirtyFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_patch(&mut self, patch: &FieldPatch) {
        for field in patch.fields() {
            self.0.insert(field.to_string());
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<'a> FromIterator<&'a str> for DirtyFields {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

/// A record as stored on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub local_id: LocalId,
    pub server_id: Option<ServerId>,
    pub tenant_id: TenantId,
    pub parent_local_id: Option<LocalId>,
    pub parent_server_id: Option<ServerId>,
    pub data: RecordData,
    pub updated_at: DateTime<Utc>,
    /// Bumped by every write; used for optimistic concurrency.
    pub revision: i64,
    pub deleted: bool,
}

impl Record {
    pub fn new_local(
        tenant_id: TenantId,
        data: RecordData,
        parent_local_id: Option<LocalId>,
        parent_server_id: Option<ServerId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            local_id: LocalId::generate(),
            server_id: None,
            tenant_id,
            parent_local_id,
            parent_server_id,
            data,
            updated_at: truncate_to_millis(now),
            revision: 1,
            deleted: false,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        self.data.entity_type()
    }

    /// Equality ignoring the revision counter.
    pub fn same_content(&self, other: &Record) -> bool {
        self.local_id == other.local_id
            && self.server_id == other.server_id
            && self.tenant_id == other.tenant_id
            && self.parent_local_id == other.parent_local_id
            && self.parent_server_id == other.parent_server_id
            && self.data == other.data
            && self.updated_at == other.updated_at
            && self.deleted == other.deleted
    }
}

/// Timestamps are persisted with millisecond precision.
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

/// A mutation made by the UI. Applied by `LocalStore::write_local`, which
/// also enqueues the matching queue entry in the same transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalMutation {
    Create {
        data: RecordData,
        parent_local_id: Option<LocalId>,
    },
    Update {
        local_id: LocalId,
        patch: FieldPatch,
    },
    Delete {
        local_id: LocalId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::fields::ChecklistItem;
    use serde_json::json;

    fn job() -> RecordData {
        RecordData::Job(JobFields {
            title: "Replace boiler".into(),
            description: None,
            status: "scheduled".into(),
            scheduled_start: None,
            scheduled_end: None,
            customer_name: Some("Ada".into()),
            customer_phone: Some("555-0100".into()),
            service_address: Some("1 Main St".into()),
        })
    }

    fn all_fields(data: &RecordData) -> DirtyFields {
        let snapshot = data.to_snapshot().unwrap();
        let mut dirty = DirtyFields::new();
        dirty.insert_patch(&snapshot);
        dirty
    }

    fn samples() -> Vec<(RecordData, RecordData)> {
        let now = Utc::now();
        vec![
            (
                job(),
                RecordData::Job(JobFields {
                    title: "Remote title".into(),
                    description: Some("from office".into()),
                    status: "dispatched".into(),
                    scheduled_start: Some(now),
                    scheduled_end: Some(now),
                    customer_name: Some("Bob".into()),
                    customer_phone: None,
                    service_address: Some("2 Side St".into()),
                }),
            ),
            (
                RecordData::Customer(CustomerFields {
                    name: "Ada".into(),
                    phone: None,
                    email: None,
                    notes: None,
                }),
                RecordData::Customer(CustomerFields {
                    name: "Ada L.".into(),
                    phone: Some("1".into()),
                    email: Some("a@example.com".into()),
                    notes: Some("gate code 12".into()),
                }),
            ),
            (
                RecordData::Address(AddressFields {
                    line1: "1 Main".into(),
                    line2: None,
                    city: "Springfield".into(),
                    region: None,
                    postal_code: None,
                    latitude: None,
                    longitude: None,
                }),
                RecordData::Address(AddressFields {
                    line1: "1 Main St".into(),
                    line2: Some("Unit 4".into()),
                    city: "Shelbyville".into(),
                    region: Some("IL".into()),
                    postal_code: Some("62701".into()),
                    latitude: Some(39.8),
                    longitude: Some(-89.6),
                }),
            ),
            (
                RecordData::LineItem(LineItemFields {
                    description: "Valve".into(),
                    quantity: 1.0,
                    unit_price_cents: 1200,
                }),
                RecordData::LineItem(LineItemFields {
                    description: "Valve (brass)".into(),
                    quantity: 2.0,
                    unit_price_cents: 1500,
                }),
            ),
            (
                RecordData::Checklist(ChecklistFields {
                    title: "Safety".into(),
                    items: vec![],
                }),
                RecordData::Checklist(ChecklistFields {
                    title: "Safety checks".into(),
                    items: vec![ChecklistItem {
                        label: "Gas off".into(),
                        done: true,
                    }],
                }),
            ),
            (
                RecordData::TimeEntry(TimeEntryFields {
                    started_at: now,
                    ended_at: None,
                    note: None,
                }),
                RecordData::TimeEntry(TimeEntryFields {
                    started_at: now - chrono::Duration::minutes(5),
                    ended_at: Some(now),
                    note: Some("travel".into()),
                }),
            ),
        ]
    }

    #[test]
    fn merge_with_no_dirty_fields_takes_remote() {
        for (local, remote) in samples() {
            let mut merged = local.clone();
            merged.merge_remote(remote.clone(), &DirtyFields::new()).unwrap();
            assert_eq!(merged, remote);
        }
    }

    #[test]
    fn merge_with_every_field_dirty_keeps_local() {
        // also proves the merge code uses the serialized field names
        for (local, remote) in samples() {
            let mut merged = local.clone();
            merged.merge_remote(remote, &all_fields(&local)).unwrap();
            assert_eq!(merged, local);
        }
    }

    #[test]
    fn merge_keeps_only_dirty_fields() {
        let mut local = job();
        let (_, remote) = samples().remove(0);
        let dirty: DirtyFields = ["title"].into_iter().collect();
        local.merge_remote(remote, &dirty).unwrap();
        match local {
            RecordData::Job(fields) => {
                assert_eq!(fields.title, "Replace boiler");
                assert_eq!(fields.status, "dispatched");
                assert_eq!(fields.customer_name.as_deref(), Some("Bob"));
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn merge_rejects_mismatched_variants() {
        let mut local = job();
        let (customer, _) = samples().remove(1);
        assert!(local.merge_remote(customer, &DirtyFields::new()).is_err());
    }

    #[test]
    fn photo_merge_never_clears_device_fields() {
        let mut local = RecordData::Photo(PhotoFields {
            caption: None,
            content_type: "image/jpeg".into(),
            remote_url: None,
            local_path: Some("/data/photo.jpg".into()),
            uploaded: false,
        });
        let remote = RecordData::from_fields(
            EntityType::Photo,
            json!({"caption": "meter", "remote_url": null}),
        )
        .unwrap();
        local.merge_remote(remote, &DirtyFields::new()).unwrap();
        let pending = local.pending_upload().expect("still pending");
        assert_eq!(pending.local_path, "/data/photo.jpg");
    }

    #[test]
    fn apply_patch_rejects_unknown_and_ill_typed_fields() {
        let mut data = job();
        let unknown = FieldPatch::default().with("colour", "red");
        assert!(data.apply_patch(&unknown).is_err());
        let ill_typed = FieldPatch::default().with("title", json!(42));
        assert!(data.apply_patch(&ill_typed).is_err());
        assert_eq!(data, job());

        let ok = FieldPatch::default().with("status", "in_progress");
        data.apply_patch(&ok).unwrap();
        match data {
            RecordData::Job(fields) => assert_eq!(fields.status, "in_progress"),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn outbound_fields_drop_device_only_values() {
        let photo = RecordData::Photo(PhotoFields {
            caption: Some("x".into()),
            content_type: "image/jpeg".into(),
            remote_url: None,
            local_path: Some("/tmp/a.jpg".into()),
            uploaded: false,
        });
        let outbound = outbound_fields(&photo.to_snapshot().unwrap());
        assert!(outbound.get("local_path").is_none());
        assert!(outbound.get("uploaded").is_none());
        assert!(outbound.get("caption").is_some());
    }
}
