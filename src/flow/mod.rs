pub mod catalog;
pub mod error;
pub mod registry;
pub mod schema;
pub mod template;

pub use catalog::{
    AutoCompleteInput, AutoCompleteOutput, ExplainCodeInput, ExplainCodeOutput, FixErrorsInput,
    FixErrorsOutput, FlowCatalog, RunWorkflowInput, RunWorkflowOutput, AUTO_COMPLETE,
    EXPLAIN_CODE, FIX_ERRORS, RUN_WORKFLOW, WORKFLOW_PRESETS,
};
pub use error::{DefinitionError, FlowError, ProviderError};
pub use registry::{FlowDefinition, FlowInvoker, FlowRegistry};
pub use schema::{Field, FieldKind, Schema, ValidationError, Violation};
pub use template::{Placeholder, PromptTemplate, TemplateError};
