//! Configuration-level errors.
//!
//! These fail fast and are never retried: they indicate a broken
//! environment or a broken test declaration, not a transient fault.

/// Errors raised while reading configuration or computing invocation
/// identifiers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A required setting is absent from the environment.
    #[error("Missing required setting {0}")]
    MissingSetting(&'static str),

    /// A setting is present but could not be parsed.
    #[error("Invalid value for {setting}: {value:?}")]
    InvalidSetting {
        /// Environment variable name.
        setting: &'static str,
        /// The raw value that failed to parse.
        value: String,
    },

    /// A step parameter has no usable textual representation, so its
    /// invocation identifier cannot be made unique across the dispatch
    /// boundary.
    #[error(
        "Parameter of type {type_name} provides no textual representation; \
         every parameter of a dispatched step must render to a stable, \
         unique string"
    )]
    UnprintableParam {
        /// Declared type of the offending parameter.
        type_name: String,
    },
}
