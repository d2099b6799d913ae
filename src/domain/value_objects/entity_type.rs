use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Customer,
    Address,
    Job,
    LineItem,
    Checklist,
    Photo,
    Signature,
    TimeEntry,
}

impl EntityType {
    /// Parents come before their dependents.
    pub const ALL: [EntityType; 8] = [
        EntityType::Customer,
        EntityType::Address,
        EntityType::Job,
        EntityType::LineItem,
        EntityType::Checklist,
        EntityType::Photo,
        EntityType::Signature,
        EntityType::TimeEntry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Customer => "customer",
            EntityType::Address => "address",
            EntityType::Job => "job",
            EntityType::LineItem => "line_item",
            EntityType::Checklist => "checklist",
            EntityType::Photo => "photo",
            EntityType::Signature => "signature",
            EntityType::TimeEntry => "time_entry",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            EntityType::Customer => "customers",
            EntityType::Address => "addresses",
            EntityType::Job => "jobs",
            EntityType::LineItem => "line_items",
            EntityType::Checklist => "checklists",
            EntityType::Photo => "photos",
            EntityType::Signature => "signatures",
            EntityType::TimeEntry => "time_entries",
        }
    }

    /// Path segment used by the remote resource API.
    pub fn resource_name(&self) -> &'static str {
        match self {
            EntityType::Customer => "customers",
            EntityType::Address => "addresses",
            EntityType::Job => "jobs",
            EntityType::LineItem => "line-items",
            EntityType::Checklist => "checklists",
            EntityType::Photo => "photos",
            EntityType::Signature => "signatures",
            EntityType::TimeEntry => "time-entries",
        }
    }

    pub fn parent_type(&self) -> Option<EntityType> {
        match self {
            EntityType::Customer => None,
            EntityType::Address | EntityType::Job => Some(EntityType::Customer),
            EntityType::LineItem
            | EntityType::Checklist
            | EntityType::Photo
            | EntityType::Signature
            | EntityType::TimeEntry => Some(EntityType::Job),
        }
    }

    /// Queue tier used when the caller does not pick one. Parents drain first
    /// so dependents find a resolved parent server id.
    pub fn default_priority(&self) -> u8 {
        match self {
            EntityType::Customer => 30,
            EntityType::Address | EntityType::Job => 20,
            _ => 10,
        }
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self, EntityType::Photo | EntityType::Signature)
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        EntityType::ALL
            .into_iter()
            .find(|ty| ty.as_str() == normalized || ty.table_name() == normalized)
            .ok_or_else(|| format!("Unknown entity type: {value}"))
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for EntityType {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        EntityType::parse(value)
    }
}
