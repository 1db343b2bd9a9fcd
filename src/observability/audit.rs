/// Lifecycle audit events for bootbox
///
/// Every state transition of a bootstrap (and every fatal failure) is emitted
/// as one JSON object through the `log` facade under the `bootbox::audit`
/// target, so `RUST_LOG=bootbox::audit=info` isolates the trail.
use crate::config::types::BootError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Log target carrying audit events
pub const AUDIT_TARGET: &str = "bootbox::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventType {
    BuildStarted,
    Provisioned,
    Configured,
    BuildVerified,
    WorkerStarting,
    WorkerExited,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Error,
}

impl LifecycleEventType {
    pub fn default_severity(&self) -> Severity {
        match self {
            LifecycleEventType::Failed => Severity::Error,
            _ => Severity::Info,
        }
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event_type: LifecycleEventType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub build_id: String,
    pub pid: u32,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl LifecycleEvent {
    pub fn new(event_type: LifecycleEventType, build_id: &str, details: impl Into<String>) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            build_id: build_id.to_string(),
            pid: std::process::id(),
            details: details.into(),
            error_kind: None,
        }
    }

    pub fn failure(build_id: &str, error: &BootError) -> Self {
        let mut event = Self::new(LifecycleEventType::Failed, build_id, error.to_string());
        event.error_kind = Some(error.kind().to_string());
        event
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                "{{\"event_type\":\"{:?}\",\"serialization_error\":\"{}\"}}",
                self.event_type, e
            )
        })
    }
}

/// Emit an event on the audit target
pub fn emit(event: &LifecycleEvent) {
    match event.severity {
        Severity::Info => log::info!(target: AUDIT_TARGET, "{}", event.to_json()),
        Severity::Error => log::error!(target: AUDIT_TARGET, "{}", event.to_json()),
    }
}

/// Shorthand for a transition event
pub fn transition(event_type: LifecycleEventType, build_id: &str, details: impl Into<String>) {
    emit(&LifecycleEvent::new(event_type, build_id, details));
}

/// Emit a failure event and hand the error back for `?` propagation
pub fn failed(build_id: &str, error: BootError) -> BootError {
    emit(&LifecycleEvent::failure(build_id, &error));
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_as_flat_json() {
        let event = LifecycleEvent::new(LifecycleEventType::Configured, "b-7", "qabel.yaml");
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();

        assert_eq!(value["event_type"], "configured");
        assert_eq!(value["severity"], "info");
        assert_eq!(value["build_id"], "b-7");
        assert_eq!(value["pid"], std::process::id());
        assert!(value.get("error_kind").is_none());
    }

    #[test]
    fn failures_carry_error_kind() {
        let err = BootError::MissingTemplate {
            path: "Docker/invoke.yml".into(),
        };
        let event = LifecycleEvent::failure("b-8", &err);
        assert_eq!(event.severity, Severity::Error);
        assert_eq!(event.error_kind.as_deref(), Some(err.kind()));

        let returned = failed("b-8", err);
        assert!(matches!(returned, BootError::MissingTemplate { .. }));
    }
}
