//! Field sets of each entity type.
//!
//! Remote merges destructure the incoming struct without `..`, so adding a
//! field without deciding how it merges is a compile error.

use super::record::DirtyFields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields that only make sense on this device and are never sent or overwritten.
pub const DEVICE_ONLY_FIELDS: &[&str] = &["local_path", "uploaded"];

pub trait MergeRemote {
    /// Remote wins for every field that is not in `dirty`.
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields);
}

fn take<T>(slot: &mut T, remote: T, dirty: &DirtyFields, field: &str) {
    if !dirty.contains(field) {
        *slot = remote;
    }
}

fn default_image_type() -> String {
    "image/jpeg".to_string()
}

fn default_signature_type() -> String {
    "image/png".to_string()
}

/// Jobs carry a copy of the customer's display data so they render offline
/// without joins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFields {
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub customer_name: Option<String>,
    pub customer_phone: Option<String>,
    pub service_address: Option<String>,
}

impl MergeRemote for JobFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let JobFields {
            title,
            description,
            status,
            scheduled_start,
            scheduled_end,
            customer_name,
            customer_phone,
            service_address,
        } = remote;
        take(&mut self.title, title, dirty, "title");
        take(&mut self.description, description, dirty, "description");
        take(&mut self.status, status, dirty, "status");
        take(&mut self.scheduled_start, scheduled_start, dirty, "scheduled_start");
        take(&mut self.scheduled_end, scheduled_end, dirty, "scheduled_end");
        take(&mut self.customer_name, customer_name, dirty, "customer_name");
        take(&mut self.customer_phone, customer_phone, dirty, "customer_phone");
        take(&mut self.service_address, service_address, dirty, "service_address");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerFields {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub notes: Option<String>,
}

impl MergeRemote for CustomerFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let CustomerFields {
            name,
            phone,
            email,
            notes,
        } = remote;
        take(&mut self.name, name, dirty, "name");
        take(&mut self.phone, phone, dirty, "phone");
        take(&mut self.email, email, dirty, "email");
        take(&mut self.notes, notes, dirty, "notes");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressFields {
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub region: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl MergeRemote for AddressFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let AddressFields {
            line1,
            line2,
            city,
            region,
            postal_code,
            latitude,
            longitude,
        } = remote;
        take(&mut self.line1, line1, dirty, "line1");
        take(&mut self.line2, line2, dirty, "line2");
        take(&mut self.city, city, dirty, "city");
        take(&mut self.region, region, dirty, "region");
        take(&mut self.postal_code, postal_code, dirty, "postal_code");
        take(&mut self.latitude, latitude, dirty, "latitude");
        take(&mut self.longitude, longitude, dirty, "longitude");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItemFields {
    pub description: String,
    pub quantity: f64,
    pub unit_price_cents: i64,
}

impl MergeRemote for LineItemFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let LineItemFields {
            description,
            quantity,
            unit_price_cents,
        } = remote;
        take(&mut self.description, description, dirty, "description");
        take(&mut self.quantity, quantity, dirty, "quantity");
        take(&mut self.unit_price_cents, unit_price_cents, dirty, "unit_price_cents");
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub label: String,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistFields {
    pub title: String,
    #[serde(default)]
    pub items: Vec<ChecklistItem>,
}

impl MergeRemote for ChecklistFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let ChecklistFields { title, items } = remote;
        take(&mut self.title, title, dirty, "title");
        // the item list is one field: partial list merges are not attempted
        take(&mut self.items, items, dirty, "items");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoFields {
    pub caption: Option<String>,
    #[serde(default = "default_image_type")]
    pub content_type: String,
    pub remote_url: Option<String>,
    pub local_path: Option<String>,
    #[serde(default)]
    pub uploaded: bool,
}

impl MergeRemote for PhotoFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let PhotoFields {
            caption,
            content_type,
            remote_url,
            local_path: _,
            uploaded: _,
        } = remote;
        take(&mut self.caption, caption, dirty, "caption");
        take(&mut self.content_type, content_type, dirty, "content_type");
        if remote_url.is_some() {
            take(&mut self.remote_url, remote_url, dirty, "remote_url");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureFields {
    pub signer_name: String,
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default = "default_signature_type")]
    pub content_type: String,
    pub remote_url: Option<String>,
    pub local_path: Option<String>,
    #[serde(default)]
    pub uploaded: bool,
}

impl MergeRemote for SignatureFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let SignatureFields {
            signer_name,
            signed_at,
            content_type,
            remote_url,
            local_path: _,
            uploaded: _,
        } = remote;
        take(&mut self.signer_name, signer_name, dirty, "signer_name");
        take(&mut self.signed_at, signed_at, dirty, "signed_at");
        take(&mut self.content_type, content_type, dirty, "content_type");
        if remote_url.is_some() {
            take(&mut self.remote_url, remote_url, dirty, "remote_url");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeEntryFields {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl MergeRemote for TimeEntryFields {
    fn merge_remote(&mut self, remote: Self, dirty: &DirtyFields) {
        let TimeEntryFields {
            started_at,
            ended_at,
            note,
        } = remote;
        take(&mut self.started_at, started_at, dirty, "started_at");
        take(&mut self.ended_at, ended_at, dirty, "ended_at");
        take(&mut self.note, note, dirty, "note");
    }
}
