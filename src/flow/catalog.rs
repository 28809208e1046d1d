//! The flows the workbench ships with.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::error::{DefinitionError, FlowError};
use super::registry::{FlowInvoker, FlowRegistry};
use super::schema::{Field, Schema};
use crate::api::ModelProvider;
use crate::types::ChatMessage;

pub const AUTO_COMPLETE: &str = "auto-complete";
pub const FIX_ERRORS: &str = "fix-errors";
pub const EXPLAIN_CODE: &str = "explain-code";
pub const RUN_WORKFLOW: &str = "run-workflow";

/// Named workflows offered by the shell, as `(label, task)`.
pub const WORKFLOW_PRESETS: &[(&str, &str)] = &[
    (
        "Add comments",
        "Add concise comments explaining what each part of the code does.",
    ),
    (
        "Refactor",
        "Refactor the code for readability without changing its behavior.",
    ),
    (
        "Add error handling",
        "Add error handling for the operations that can fail.",
    ),
    (
        "Optimize",
        "Improve the performance of the code without changing its behavior.",
    ),
    (
        "Modernize",
        "Rewrite the code using modern idioms of the language.",
    ),
];

const AUTO_COMPLETE_PROMPT: &str = "You are an AI code completion assistant.  Given the following code prefix and programming language, suggest a code completion.

Language: {{{language}}}
Code Prefix:
{{{codePrefix}}}";

const FIX_ERRORS_PROMPT: &str = "You are an AI code assistant. You will receive a block of code, and your job is to fix any errors in the code, and explain what you changed and why.

  Language: {{{language}}}
  Code:
  {{{
    code
  }}}
  ";

const EXPLAIN_CODE_PROMPT: &str = "You are an expert software developer and a patient teacher. Explain what the following code does, step by step, in plain language. Point out anything surprising or likely to be a bug.

Language: {{{language}}}
Code:
```{{{language}}}
{{{code}}}
```
";

const RUN_WORKFLOW_PROMPT: &str = "You are an expert software developer that only outputs code. You will be given a block of code and a task to perform on it. Your task is to apply the requested changes and output ONLY the complete, modified code block. Do not add any explanations, comments, or markdown formatting around the code.

Task: {{{workflow}}}

Language: {{{language}}}

Code:
```{{{language}}}
{{{code}}}
```
";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCompleteInput {
    pub code_prefix: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoCompleteOutput {
    pub completion: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixErrorsInput {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixErrorsOutput {
    pub fixed_code: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainCodeInput {
    pub code: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplainCodeOutput {
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWorkflowInput {
    pub code: String,
    pub language: String,
    pub workflow: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunWorkflowOutput {
    pub modified_code: String,
}

fn language_field(what: &str) -> Field {
    Field::text("language").describe(format!("The programming language{what}."))
}

/// Registers the four structured flows.
pub fn register_catalog(registry: &mut FlowRegistry) -> Result<(), DefinitionError> {
    registry.define(
        AUTO_COMPLETE,
        Schema::object()
            .field(Field::text("codePrefix").describe("The code prefix to complete."))
            .field(language_field("")),
        Schema::object()
            .field(Field::text("completion").describe("The code completion suggestion.")),
        AUTO_COMPLETE_PROMPT,
    )?;

    registry.define(
        FIX_ERRORS,
        Schema::object()
            .field(
                Field::text("code").describe("The code block to fix, which may contain errors."),
            )
            .field(language_field(" of the code")),
        Schema::object()
            .field(Field::text("fixedCode").describe("The corrected code block with errors fixed."))
            .field(
                Field::text("explanation")
                    .describe("An explanation of the changes made to fix the errors."),
            ),
        FIX_ERRORS_PROMPT,
    )?;

    registry.define(
        EXPLAIN_CODE,
        Schema::object()
            .field(Field::text("code").describe("The code to explain."))
            .field(language_field(" of the code")),
        Schema::object()
            .field(Field::text("explanation").describe("A plain-language explanation of the code.")),
        EXPLAIN_CODE_PROMPT,
    )?;

    registry.define(
        RUN_WORKFLOW,
        Schema::object()
            .field(Field::text("code").describe("The code to modify."))
            .field(language_field(" of the code"))
            .field(Field::text("workflow").describe("The workflow task to perform.")),
        Schema::object().field(
            Field::text("modifiedCode").describe("The modified code after running the workflow."),
        ),
        RUN_WORKFLOW_PROMPT,
    )?;

    Ok(())
}

/// Typed entry points over the registered flows.
#[derive(Clone)]
pub struct FlowCatalog {
    invoker: FlowInvoker,
}

impl FlowCatalog {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, DefinitionError> {
        let mut registry = FlowRegistry::new();
        register_catalog(&mut registry)?;
        Ok(Self {
            invoker: FlowInvoker::new(registry, provider, request_timeout),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.invoker.registry().names()
    }

    pub async fn invoke(
        &self,
        name: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, FlowError> {
        self.invoker.invoke(name, input, cancel).await
    }

    pub async fn auto_complete(
        &self,
        input: &AutoCompleteInput,
        cancel: &CancellationToken,
    ) -> Result<AutoCompleteOutput, FlowError> {
        self.invoker.invoke_typed(AUTO_COMPLETE, input, cancel).await
    }

    pub async fn fix_errors(
        &self,
        input: &FixErrorsInput,
        cancel: &CancellationToken,
    ) -> Result<FixErrorsOutput, FlowError> {
        self.invoker.invoke_typed(FIX_ERRORS, input, cancel).await
    }

    pub async fn explain_code(
        &self,
        input: &ExplainCodeInput,
        cancel: &CancellationToken,
    ) -> Result<ExplainCodeOutput, FlowError> {
        self.invoker.invoke_typed(EXPLAIN_CODE, input, cancel).await
    }

    pub async fn run_workflow(
        &self,
        input: &RunWorkflowInput,
        cancel: &CancellationToken,
    ) -> Result<RunWorkflowOutput, FlowError> {
        self.invoker.invoke_typed(RUN_WORKFLOW, input, cancel).await
    }

    pub async fn chat(
        &self,
        history: &[ChatMessage],
        message: &str,
        deltas: Option<&mpsc::UnboundedSender<String>>,
        cancel: &CancellationToken,
    ) -> Result<String, FlowError> {
        self.invoker.chat(history, message, deltas, cancel).await
    }
}
