//! Durable state form and proposed changes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name carrying the state label in generic field writes and in
/// persisted documents.
pub const STATE_FIELD: &str = "state";

/// Field name carrying auxiliary attributes in persisted documents.
pub const ATTRS_FIELD: &str = "attrs";

/// Durable representation of a state machine's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Current state label.
    pub state: String,

    /// Auxiliary data kept next to the label.
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl StateSnapshot {
    pub fn new(state: impl Into<String>, attrs: Map<String, Value>) -> Self {
        Self {
            state: state.into(),
            attrs,
        }
    }

    /// First-use snapshot: the default label and no attributes.
    pub fn seeded(default_state: impl Into<String>) -> Self {
        Self::new(default_state, Map::new())
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }
}

/// One proposed mutation of a state container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateChange {
    SetState { state: String },
    SetAttr { name: String, value: Value },
    RemoveAttr { name: String },
}

impl StateChange {
    pub fn set_state(state: impl Into<String>) -> Self {
        StateChange::SetState {
            state: state.into(),
        }
    }

    pub fn set_attr(name: impl Into<String>, value: impl Into<Value>) -> Self {
        StateChange::SetAttr {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn remove_attr(name: impl Into<String>) -> Self {
        StateChange::RemoveAttr { name: name.into() }
    }

    /// Map a generic `field = value` write onto a change.
    ///
    /// Writing [`STATE_FIELD`] sets the label and requires a string; any
    /// other field is an attribute. Returns the offending value on error.
    pub fn from_field(name: &str, value: Value) -> Result<Self, Value> {
        if name == STATE_FIELD {
            match value {
                Value::String(state) => Ok(StateChange::SetState { state }),
                other => Err(other),
            }
        } else {
            Ok(StateChange::set_attr(name, value))
        }
    }

    /// Name of the field this change touches.
    pub fn field(&self) -> &str {
        match self {
            StateChange::SetState { .. } => STATE_FIELD,
            StateChange::SetAttr { name, .. } | StateChange::RemoveAttr { name } => name,
        }
    }

    pub fn apply_to(&self, snapshot: &mut StateSnapshot) {
        match self {
            StateChange::SetState { state } => snapshot.state.clone_from(state),
            StateChange::SetAttr { name, value } => {
                snapshot.attrs.insert(name.clone(), value.clone());
            }
            StateChange::RemoveAttr { name } => {
                snapshot.attrs.remove(name);
            }
        }
    }
}

impl fmt::Display for StateChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateChange::SetState { state } => write!(f, "{STATE_FIELD} := {state:?}"),
            StateChange::SetAttr { name, value } => write!(f, "{name} := {value}"),
            StateChange::RemoveAttr { name } => write!(f, "del {name}"),
        }
    }
}
