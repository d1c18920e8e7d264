//! Audit trail domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categories of audited events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    ResourceChange,
    PolicyViolation,
    UserAction,
    SystemEvent,
    Authentication,
    Authorization,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ResourceChange => "resource_change",
            Self::PolicyViolation => "policy_violation",
            Self::UserAction => "user_action",
            Self::SystemEvent => "system_event",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
        }
    }
}

/// One append-only audit record; serialized as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub actor: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(
        event_type: AuditEventType,
        actor: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            actor: actor.into(),
            action: action.into(),
            resource_id: None,
            success: true,
            metadata: None,
            error: None,
        }
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Entry-level validation applied before a write: the actor and action
    /// must be present alongside the required timestamp and event type.
    pub fn validate(&self) -> Result<(), String> {
        if self.actor.trim().is_empty() {
            return Err("audit entry actor must not be empty".to_string());
        }
        if self.action.trim().is_empty() {
            return Err("audit entry action must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_shape() {
        let entry = AuditEntry::new(AuditEventType::ResourceChange, "system", "apply")
            .with_resource("pkg.nginx");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event_type"], "resource_change");
        assert_eq!(json["resource_id"], "pkg.nginx");
        assert_eq!(json["success"], true);
    }

    #[test]
    fn test_validate_rejects_empty_actor() {
        let entry = AuditEntry::new(AuditEventType::UserAction, "", "login");
        assert!(entry.validate().is_err());
    }
}
