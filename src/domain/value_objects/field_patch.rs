use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name → value map. Used both as an UPDATE diff and as a CREATE snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldPatch(Map<String, Value>);

impl FieldPatch {
    pub fn new(value: Value) -> Result<Self, String> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            _ => Err("Field patch must be a JSON object".to_string()),
        }
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("Invalid JSON payload: {e}"))?;
        Self::new(value)
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Later values win.
    pub fn merge(&mut self, later: &FieldPatch) {
        for (key, value) in &later.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
