//! The workbench session: one editor buffer, one sandbox, the AI flows and
//! everything the shell displays.
//!
//! Every operation takes `&mut self`, so a second action cannot start while
//! one is awaiting the model.

use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ModelProvider;
use crate::config::{Config, DEFAULT_REQUEST_TIMEOUT};
use crate::editor::{EditorSurface, Position, Range, TextBuffer, TextEdit};
use crate::flow::{
    catalog, AutoCompleteInput, DefinitionError, ExplainCodeInput, FixErrorsInput, FixErrorsOutput,
    FlowCatalog, FlowError, RunWorkflowInput,
};
use crate::language::Language;
use crate::sandbox::{RunOutcome, Sandbox, SandboxError, SandboxOptions};
use crate::state::{ChatHistory, Transcript, TranscriptEntry};

pub const AI_ERROR_TITLE: &str = "AI Error";
pub const EXPLAIN_FALLBACK: &str = "An error occurred while fetching the explanation.";
pub const FIX_FALLBACK: &str = "An error occurred while fetching the fix.";
pub const WORKFLOW_FALLBACK: &str = "An error occurred while running the workflow.";
pub const CHAT_FALLBACK: &str = "Sorry, I ran into an error answering that.";

const EDIT_ID_FIX: &str = "ai-fix";
const EDIT_ID_AUTOCOMPLETE: &str = "ai-autocomplete";
const EDIT_ID_WORKFLOW: &str = "ai-workflow";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiAction {
    Explain,
    Fix,
    AutoComplete,
    Workflow,
    Chat,
    /// A flow invoked by name with caller-built input.
    Flow,
}

impl AiAction {
    fn for_flow(name: &str) -> Self {
        match name {
            catalog::EXPLAIN_CODE => AiAction::Explain,
            catalog::FIX_ERRORS => AiAction::Fix,
            catalog::AUTO_COMPLETE => AiAction::AutoComplete,
            catalog::RUN_WORKFLOW => AiAction::Workflow,
            _ => AiAction::Flow,
        }
    }

    fn failure_description(self) -> &'static str {
        match self {
            AiAction::Explain => "Failed to get explanation from AI.",
            AiAction::Fix => "Failed to get fix from AI.",
            AiAction::AutoComplete => "Failed to get autocompletion from AI.",
            AiAction::Workflow => "Failed to run the workflow.",
            AiAction::Chat => "Failed to get a chat reply from AI.",
            AiAction::Flow => "Failed to get a response from AI.",
        }
    }
}

impl fmt::Display for AiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AiAction::Explain => "explain",
            AiAction::Fix => "fix",
            AiAction::AutoComplete => "complete",
            AiAction::Workflow => "run the workflow on",
            AiAction::Chat => "send",
            AiAction::Flow => "process",
        })
    }
}

#[derive(Error, Debug)]
pub enum WorkbenchError {
    #[error("no code to {0}")]
    EmptyCode(AiAction),

    #[error("nothing to {0}: the text is empty")]
    EmptyPrompt(AiAction),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

/// A transient message for the user, shown once by the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub description: String,
}

impl Notice {
    fn new(level: NoticeLevel, title: &str, description: impl Into<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkbenchOptions {
    pub language: Language,
    pub request_timeout: Option<Duration>,
    pub sandbox: SandboxOptions,
}

impl Default for WorkbenchOptions {
    fn default() -> Self {
        Self {
            language: Language::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            sandbox: SandboxOptions::default(),
        }
    }
}

impl From<&Config> for WorkbenchOptions {
    fn from(config: &Config) -> Self {
        Self {
            language: config.language,
            request_timeout: config.request_timeout,
            sandbox: SandboxOptions {
                eval_timeout: config.eval_timeout,
                memory_limit: config.memory_limit,
            },
        }
    }
}

pub struct Workbench {
    buffer: TextBuffer,
    language: Language,
    sandbox: Sandbox,
    catalog: FlowCatalog,
    transcript: Transcript,
    chat: ChatHistory,
    explanation: String,
    last_run: Vec<String>,
    notices: Vec<Notice>,
    cancel: CancellationToken,
}

impl Workbench {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        options: WorkbenchOptions,
    ) -> Result<Self, WorkbenchError> {
        Ok(Self {
            buffer: TextBuffer::new(options.language.starter_document()),
            language: options.language,
            sandbox: Sandbox::new(options.sandbox)?,
            catalog: FlowCatalog::new(provider, options.request_timeout)?,
            transcript: Transcript::new(),
            chat: ChatHistory::new(),
            explanation: String::new(),
            last_run: Vec::new(),
            notices: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn buffer(&self) -> &TextBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut TextBuffer {
        &mut self.buffer
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn chat(&self) -> &ChatHistory {
        &self.chat
    }

    pub fn explanation(&self) -> &str {
        &self.explanation
    }

    /// Output panel contents from the most recent run.
    pub fn last_run(&self) -> &[String] {
        &self.last_run
    }

    pub fn flow_names(&self) -> Vec<&str> {
        self.catalog.names()
    }

    /// Token the shell cancels to abort the pending AI action.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn clear_transcript(&mut self) {
        self.transcript.clear();
    }

    /// Runs the whole buffer. Output replaces the output panel and is
    /// appended to the transcript.
    pub fn run_code(&mut self) -> RunOutcome {
        let outcome = self.sandbox.run(self.language, self.buffer.text());
        match &outcome {
            RunOutcome::Unsupported(language) => {
                self.notices.push(Notice::new(
                    NoticeLevel::Info,
                    "Info",
                    format!(
                        "{} execution is not supported in this environment.",
                        language.display_name()
                    ),
                ));
            }
            _ => {
                self.last_run = outcome.lines();
                self.transcript.push_output_lines(self.last_run.clone());
            }
        }
        tracing::info!(language = %self.language, error = outcome.is_error(), "ran buffer");
        outcome
    }

    /// Evaluates one REPL line at global scope. Returns false when the line
    /// was blank and nothing was recorded.
    pub fn submit_terminal_line(&mut self, line: &str) -> bool {
        if line.trim().is_empty() {
            return false;
        }

        self.transcript
            .push(TranscriptEntry::Command(line.to_string()));
        let evaluation = self.sandbox.evaluate(line, &mut self.transcript);
        self.transcript.record_evaluation(evaluation);
        true
    }

    /// Generic entry point for any registered flow. Blank `code` or
    /// `codePrefix` input is refused before the model is contacted.
    pub async fn invoke_flow(&mut self, name: &str, input: Value) -> Result<Value, WorkbenchError> {
        let action = AiAction::for_flow(name);
        let blank_code = ["code", "codePrefix"]
            .iter()
            .filter_map(|key| input.get(key).and_then(Value::as_str))
            .any(|code| code.trim().is_empty());
        if blank_code {
            return Err(self.reject_empty(action));
        }

        let cancel = self.cancel.clone();
        let result = self.catalog.invoke(name, input, &cancel).await;
        self.settle(result, action.failure_description())
    }

    pub async fn explain_code(&mut self) -> Result<String, WorkbenchError> {
        let code = self.code_for(AiAction::Explain)?;
        self.explanation.clear();

        let cancel = self.cancel.clone();
        let input = ExplainCodeInput {
            code,
            language: self.language.id().to_string(),
        };
        let result = self.catalog.explain_code(&input, &cancel).await;
        match self.settle(result, AiAction::Explain.failure_description()) {
            Ok(output) => {
                self.explanation = output.explanation.clone();
                Ok(output.explanation)
            }
            Err(error) => Err(self.fallback_explanation(error, EXPLAIN_FALLBACK)),
        }
    }

    /// Replaces the selection, or the whole buffer when nothing is selected,
    /// with the fixed code.
    pub async fn fix_code(&mut self) -> Result<FixErrorsOutput, WorkbenchError> {
        let code = self.code_for(AiAction::Fix)?;
        self.explanation.clear();

        let cancel = self.cancel.clone();
        let input = FixErrorsInput {
            code,
            language: self.language.id().to_string(),
        };
        let result = self.catalog.fix_errors(&input, &cancel).await;
        match self.settle(result, AiAction::Fix.failure_description()) {
            Ok(output) => {
                self.replace_target(EDIT_ID_FIX, &output.fixed_code);
                self.explanation = output.explanation.clone();
                self.notices.push(Notice::new(
                    NoticeLevel::Success,
                    "Success",
                    "Code has been fixed.",
                ));
                Ok(output)
            }
            Err(error) => Err(self.fallback_explanation(error, FIX_FALLBACK)),
        }
    }

    /// Completes the code before the cursor and inserts the suggestion there.
    pub async fn auto_complete(&mut self) -> Result<String, WorkbenchError> {
        let position = self.buffer.get_position();
        let code_prefix = self
            .buffer
            .get_value_in_range(Range::new(Position::START, position));
        if code_prefix.trim().is_empty() {
            return Err(self.reject_empty(AiAction::AutoComplete));
        }

        let cancel = self.cancel.clone();
        let input = AutoCompleteInput {
            code_prefix,
            language: self.language.id().to_string(),
        };
        let result = self.catalog.auto_complete(&input, &cancel).await;
        let output = self.settle(result, AiAction::AutoComplete.failure_description())?;
        self.buffer.execute_edits(
            EDIT_ID_AUTOCOMPLETE,
            &[TextEdit::new(Range::caret(position), output.completion.clone())],
        );
        Ok(output.completion)
    }

    /// Applies a free-text task to the selection or the whole buffer.
    pub async fn run_workflow(&mut self, task: &str) -> Result<String, WorkbenchError> {
        let workflow = task.trim();
        if workflow.is_empty() {
            return Err(WorkbenchError::EmptyPrompt(AiAction::Workflow));
        }
        let code = self.code_for(AiAction::Workflow)?;

        let cancel = self.cancel.clone();
        let input = RunWorkflowInput {
            code,
            language: self.language.id().to_string(),
            workflow: workflow.to_string(),
        };
        let result = self.catalog.run_workflow(&input, &cancel).await;
        match self.settle(result, AiAction::Workflow.failure_description()) {
            Ok(output) => {
                self.replace_target(EDIT_ID_WORKFLOW, &output.modified_code);
                self.notices.push(Notice::new(
                    NoticeLevel::Success,
                    "Success",
                    format!("Workflow applied: {workflow}"),
                ));
                Ok(output.modified_code)
            }
            Err(error) => Err(self.fallback_explanation(error, WORKFLOW_FALLBACK)),
        }
    }

    /// Sends a chat message with the full history. Streamed pieces of the
    /// reply go to `deltas` when given.
    pub async fn send_chat_message(
        &mut self,
        text: &str,
        deltas: Option<&mpsc::UnboundedSender<String>>,
    ) -> Result<String, WorkbenchError> {
        if text.trim().is_empty() {
            return Err(WorkbenchError::EmptyPrompt(AiAction::Chat));
        }

        let cancel = self.cancel.clone();
        let result = self
            .catalog
            .chat(self.chat.messages(), text, deltas, &cancel)
            .await;
        match self.settle(result, AiAction::Chat.failure_description()) {
            Ok(reply) => {
                self.chat.push_exchange(text, reply.clone());
                Ok(reply)
            }
            Err(error) => {
                if !is_cancelled(&error) {
                    self.chat.push_exchange(text, CHAT_FALLBACK);
                }
                Err(error)
            }
        }
    }

    /// Loads the starter document of `language` and clears every per-document
    /// panel.
    pub fn switch_language(&mut self, language: Language) {
        self.language = language;
        self.buffer.reset(language.starter_document());
        self.transcript.clear();
        self.chat.clear();
        self.explanation.clear();
        self.last_run.clear();
        tracing::info!(%language, "switched language");
    }

    /// Replaces the buffer with a file. The language follows the extension
    /// when it is recognised.
    pub fn open_file(&mut self, path: &Path) -> Result<(), WorkbenchError> {
        let text = std::fs::read_to_string(path).map_err(|source| WorkbenchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(language) = Language::from_path(path) {
            self.language = language;
        }
        self.buffer.reset(text);
        self.explanation.clear();
        tracing::info!(path = %path.display(), language = %self.language, "opened file");
        Ok(())
    }

    pub fn save_file(&self, path: &Path) -> Result<(), WorkbenchError> {
        std::fs::write(path, self.buffer.text()).map_err(|source| WorkbenchError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "saved buffer");
        Ok(())
    }

    /// Selection text, or the whole buffer when nothing is selected.
    fn code_for(&mut self, action: AiAction) -> Result<String, WorkbenchError> {
        let code = match self.buffer.get_selection() {
            Some(selection) => self.buffer.get_value_in_range(selection),
            None => self.buffer.get_value(),
        };
        if code.trim().is_empty() {
            return Err(self.reject_empty(action));
        }
        Ok(code)
    }

    fn reject_empty(&mut self, action: AiAction) -> WorkbenchError {
        self.notices.push(Notice::new(
            NoticeLevel::Error,
            "Error",
            format!("No code selected to {action}."),
        ));
        WorkbenchError::EmptyCode(action)
    }

    fn replace_target(&mut self, edit_id: &str, text: &str) {
        match self.buffer.get_selection() {
            Some(selection) => self
                .buffer
                .execute_edits(edit_id, &[TextEdit::new(selection, text)]),
            None => self.buffer.set_value(text),
        }
    }

    /// Turns a flow result into a session result, recording a notice on
    /// failure and re-arming cancellation once it has fired.
    fn settle<T>(
        &mut self,
        result: Result<T, FlowError>,
        failure: &str,
    ) -> Result<T, WorkbenchError> {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        match result {
            Ok(value) => Ok(value),
            Err(FlowError::Cancelled) => {
                self.notices
                    .push(Notice::new(NoticeLevel::Info, "Cancelled", "Request cancelled."));
                Err(FlowError::Cancelled.into())
            }
            Err(error) => {
                tracing::warn!(%error, "AI action failed");
                self.notices
                    .push(Notice::new(NoticeLevel::Error, AI_ERROR_TITLE, failure));
                Err(error.into())
            }
        }
    }

    fn fallback_explanation(&mut self, error: WorkbenchError, fallback: &str) -> WorkbenchError {
        if !is_cancelled(&error) {
            self.explanation = fallback.to_string();
        }
        error
    }
}

fn is_cancelled(error: &WorkbenchError) -> bool {
    matches!(error, WorkbenchError::Flow(FlowError::Cancelled))
}
