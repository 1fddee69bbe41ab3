use strum::AsRefStr;
use strum::Display;

/// Type of Kubernetes event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum EventType {
    Normal,
    Warning,
}

/// Why an event about a binding was emitted. Rendered CamelCase, as Kubernetes expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
pub enum BindingEventReason {
    FinalizerAdded,
    FinalizerRemoved,
    CredentialIssued,
    BindFailed,
    ApplyFailed,
    UnbindFailed,
}

/// A single event about a binding.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    pub type_: EventType,
    pub reason: BindingEventReason,
    pub message: String,
    pub action: Option<String>,
}

impl EventData {
    pub fn normal(reason: BindingEventReason, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Normal,
            reason,
            message: message.into(),
            action: None,
        }
    }

    pub fn warning(reason: BindingEventReason, message: impl Into<String>) -> Self {
        Self {
            type_: EventType::Warning,
            reason,
            message: message.into(),
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}
