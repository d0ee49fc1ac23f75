use serde::Serialize;

use omnilog_api::{IngestError, LogCreatedPayload, now_ms};

/// Stored shape of one audit log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub id: String,
    pub ip_address: String,
    pub client_host: String,
    pub provider: String,
    pub level: i64,
    pub message: i64,
    pub description: String,
    pub path: String,
    pub resource: String,
    pub action: String,
    pub data: String,
    pub old_data: String,
    /// Tenant categories as a JSON array, or empty when there are none.
    pub tenant_cat: String,
    /// Tenant ids as a JSON array, or empty when there are none.
    pub tenant_id: String,
    pub user_id: String,
    pub target: String,
    pub created_at_ms: i64,
}

impl LogRecord {
    /// Map a decoded event payload to a new record with a fresh id.
    pub fn from_payload(payload: &LogCreatedPayload) -> Result<Self, IngestError> {
        let (tenant_cat, tenant_id) = if payload.tenant_cat.is_empty() {
            (String::new(), String::new())
        } else {
            let cat = serde_json::to_string(&payload.tenant_cat)
                .map_err(|e| IngestError::storage(format!("marshal tenant categories: {e}")))?;
            let ids = serde_json::to_string(&payload.tenant_ids())
                .map_err(|e| IngestError::storage(format!("marshal tenant ids: {e}")))?;
            (cat, ids)
        };

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            ip_address: payload.ip_address.clone(),
            client_host: payload.client_host.clone(),
            provider: payload.provider.clone(),
            level: payload.level,
            message: payload.message,
            description: payload.description.clone(),
            path: payload.path.clone(),
            resource: payload.resource.clone(),
            action: payload.action.clone(),
            data: payload.data.clone(),
            old_data: payload.old_data.clone(),
            tenant_cat,
            tenant_id,
            user_id: payload.user_id.clone(),
            target: payload.target.clone(),
            created_at_ms: now_ms(),
        })
    }
}
