use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    Created,
    Updated,
    Deleted,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Append-only audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: i64,
    pub model_type: String,
    pub model_id: i64,
    pub user_id: Option<i64>,
    pub event: AuditEvent,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    /// Keys touched by this entry with their `(old, new)` values.
    pub fn changed_attributes(&self) -> BTreeMap<String, (Option<Value>, Option<Value>)> {
        let old = self.old_values.as_ref().and_then(Value::as_object);
        let new = self.new_values.as_ref().and_then(Value::as_object);

        let mut keys: Vec<&String> = Vec::new();
        keys.extend(old.into_iter().flat_map(|m| m.keys()));
        keys.extend(new.into_iter().flat_map(|m| m.keys()));

        keys.into_iter()
            .map(|key| {
                let before = old.and_then(|m| m.get(key)).cloned();
                let after = new.and_then(|m| m.get(key)).cloned();
                (key.clone(), (before, after))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditLog {
    pub model_type: String,
    pub model_id: i64,
    pub user_id: Option<i64>,
    pub event: AuditEvent,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub url: Option<String>,
    pub trace_id: Option<String>,
}
