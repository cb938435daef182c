//! Deterministic invocation identifiers.
//!
//! An [`InvocationId`] names one (scope, step, parameter-list)
//! combination. It labels the remote job's work selector and lets a
//! worker process recognise which sibling parameterization of a step it
//! was dispatched to run. Identity is purely textual, so every
//! parameter must render to a stable string on both sides of the
//! dispatch boundary.

use crate::error::ConfigError;

/// Deterministic key for one invocation of one step.
///
/// Format: `scope.step([type=value],[type=value],...)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvocationId(String);

impl InvocationId {
    /// Compute the identifier for a step invocation.
    ///
    /// Pure: equal inputs always produce equal identifiers, and sibling
    /// parameterizations differing in any parameter value produce
    /// different identifiers. A parameter without a textual
    /// representation is a configuration error, never silently skipped.
    pub fn compute(
        scope: &str,
        step: &str,
        params: &[StepParam],
    ) -> Result<Self, ConfigError> {
        let mut id = String::with_capacity(scope.len() + step.len() + 2 + params.len() * 16);
        id.push_str(scope);
        id.push('.');
        id.push_str(step);
        id.push('(');
        for (i, param) in params.iter().enumerate() {
            let value = param.value.as_deref().ok_or_else(|| {
                ConfigError::UnprintableParam {
                    type_name: param.type_name.clone(),
                }
            })?;
            if i > 0 {
                id.push(',');
            }
            id.push_str(&format!("[{}={}]", param.type_name, value));
        }
        id.push(')');
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<InvocationId> for String {
    fn from(id: InvocationId) -> Self {
        id.0
    }
}

/// One declared parameter of a step, in declaration order.
#[derive(Debug, Clone)]
pub struct StepParam {
    /// Declared type of the parameter.
    pub type_name: String,
    /// Textual representation of the runtime value, if the type has one.
    pub value: Option<String>,
}

impl StepParam {
    /// Capture a displayable parameter value.
    pub fn of<T: std::fmt::Display>(value: &T) -> Self {
        Self {
            type_name: std::any::type_name::<T>().to_string(),
            value: Some(value.to_string()),
        }
    }

    /// Record a parameter whose type provides no textual representation.
    ///
    /// Computing an identifier over such a parameter fails with
    /// [`ConfigError::UnprintableParam`].
    pub fn opaque(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: None,
        }
    }
}
