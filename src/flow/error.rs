use std::time::Duration;
use thiserror::Error;

use super::schema::ValidationError;
use super::template::TemplateError;

/// Raised while registering a flow. These are programming errors in the flow
/// catalog, never user input problems.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("a flow named '{0}' is already registered")]
    DuplicateFlow(String),

    #[error("flow '{flow}' declares field '{field}' more than once")]
    DuplicateField { flow: String, field: String },

    #[error("flow '{flow}' has a malformed prompt template: {source}")]
    MalformedTemplate {
        flow: String,
        #[source]
        source: TemplateError,
    },

    #[error("flow '{flow}' references placeholder '{placeholder}', which is not an input field")]
    UnknownPlaceholder { flow: String, placeholder: String },
}

/// Failure reported by a model provider. Carries no structure beyond what is
/// needed for a readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("cannot reach model endpoint '{url}': {message}")]
    Unreachable { url: String, message: String },

    #[error("model request timed out after {0:?}")]
    Timeout(Duration),

    #[error("model endpoint '{url}' returned HTTP {status}: {message}")]
    Status {
        url: String,
        status: u16,
        message: String,
    },

    #[error("model request to '{url}' failed: {message}")]
    Transport { url: String, message: String },

    #[error("model response could not be parsed: {0}")]
    MalformedResponse(String),

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model provider rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("no flow named '{0}' is registered")]
    UnknownFlow(String),

    #[error("input for flow '{flow}' is invalid: {source}")]
    InputValidation {
        flow: String,
        #[source]
        source: ValidationError,
    },

    #[error("output of flow '{flow}' is invalid: {source}")]
    OutputValidation {
        flow: String,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("request was cancelled")]
    Cancelled,
}

impl FlowError {
    /// True when the provider answered but the answer broke the output contract.
    pub fn is_output_validation(&self) -> bool {
        matches!(self, FlowError::OutputValidation { .. })
    }
}
