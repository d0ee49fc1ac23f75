use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::IngestError;

/// Tenant category attached to a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantCategory {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

/// Typed projection of a "log created" event's data.
///
/// Keys arrive PascalCase from upstream producers. Identity fields are
/// required; free-text and JSON-document fields default to empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogCreatedPayload {
    pub ip_address: String,
    pub client_host: String,
    pub provider: String,
    pub level: i64,
    /// Message-catalog id.
    pub message: i64,
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub action: String,
    /// JSON document describing the new state.
    #[serde(default)]
    pub data: String,
    /// JSON document describing the previous state.
    #[serde(default)]
    pub old_data: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub tenant_cat: Vec<TenantCategory>,
}

impl LogCreatedPayload {
    /// Decode from an event's untyped data map.
    pub fn from_data(data: &Map<String, Value>) -> Result<Self, IngestError> {
        serde_json::from_value(Value::Object(data.clone()))
            .map_err(|e| IngestError::decode(e.to_string()).with_context("log created payload"))
    }

    /// Ids of all tenant categories, in order.
    pub fn tenant_ids(&self) -> Vec<i64> {
        self.tenant_cat.iter().map(|t| t.id).collect()
    }
}
