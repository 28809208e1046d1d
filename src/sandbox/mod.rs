//! Embedded JavaScript execution.
//!
//! A [`Sandbox`] owns one QuickJS realm. Globals persist across evaluations,
//! the way they would on a web page. Console output is captured per call and
//! handed to the caller's [`ConsoleSink`]; the console methods are restored
//! after every call whatever the outcome.
//!
//! This is isolation from the host process, not protection against hostile
//! code: there is no capability model beyond what QuickJS exposes by default.

use rquickjs::{Context, Ctx, Function, Object, Runtime, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::DEFAULT_EVAL_TIMEOUT;
use crate::language::Language;

const PRELUDE: &str = include_str!("prelude.js");
const HARNESS: &str = "__codebench";

/// Output shown when a run logs nothing.
pub const NO_OUTPUT_SENTINEL: &str = "Code executed successfully with no output.";

#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("JavaScript engine failed to start: {0}")]
    Engine(String),
}

/// Receives console lines produced during one evaluation, in order.
pub trait ConsoleSink {
    fn line(&mut self, line: String);
}

impl ConsoleSink for Vec<String> {
    fn line(&mut self, line: String) {
        self.push(line);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    /// Completion value rendered structurally; `None` for `undefined`.
    Returned(Option<String>),
    Thrown(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Output(Vec<String>),
    Error(String),
    Unsupported(Language),
}

impl RunOutcome {
    /// Lines as they should appear in an output panel.
    pub fn lines(&self) -> Vec<String> {
        match self {
            RunOutcome::Output(lines) => lines.clone(),
            RunOutcome::Error(message) => vec![format!("Error: {message}")],
            RunOutcome::Unsupported(_) => Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RunOutcome::Error(_))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxOptions {
    /// Evaluations running longer than this are interrupted. `None` never
    /// interrupts.
    pub eval_timeout: Option<Duration>,
    pub memory_limit: Option<usize>,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            eval_timeout: Some(DEFAULT_EVAL_TIMEOUT),
            memory_limit: None,
        }
    }
}

pub struct Sandbox {
    context: Context,
    runtime: Runtime,
    deadline: Rc<Cell<Option<Instant>>>,
    eval_timeout: Option<Duration>,
}

impl Sandbox {
    pub fn new(options: SandboxOptions) -> Result<Self, SandboxError> {
        let runtime = Runtime::new().map_err(|e| SandboxError::Engine(e.to_string()))?;
        if let Some(limit) = options.memory_limit {
            runtime.set_memory_limit(limit);
        }

        let deadline: Rc<Cell<Option<Instant>>> = Rc::new(Cell::new(None));
        let armed = Rc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || {
            armed.get().is_some_and(|at| Instant::now() >= at)
        })));

        let context = Context::full(&runtime).map_err(|e| SandboxError::Engine(e.to_string()))?;
        context.with(|ctx| {
            ctx.eval::<Value, _>(PRELUDE)
                .map(|_| ())
                .map_err(|error| SandboxError::Engine(describe_engine_error(&ctx, error)))
        })?;

        Ok(Self {
            context,
            runtime,
            deadline,
            eval_timeout: options.eval_timeout,
        })
    }

    /// Evaluates `source` as a global script, then runs the promise jobs it
    /// queued. Console lines go to `sink` even when the script throws.
    pub fn evaluate(&mut self, source: &str, sink: &mut dyn ConsoleSink) -> Evaluation {
        let captured: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let deadline = Rc::clone(&self.deadline);
        let timeout = self.eval_timeout;

        let evaluation = self.context.with(|ctx| {
            evaluate_in(&ctx, source, &captured, &deadline, timeout).unwrap_or_else(|error| {
                Evaluation::Thrown(describe_engine_error(&ctx, error))
            })
        });
        self.run_pending_jobs();
        self.context.with(|ctx| {
            if let Err(error) = detach_console(&ctx) {
                let message = describe_engine_error(&ctx, error);
                tracing::warn!(%message, "could not restore console");
            }
        });
        self.deadline.set(None);

        for line in captured.take() {
            sink.line(line);
        }
        evaluation
    }

    /// Drains the job queue under the same deadline as a script. Jobs must
    /// run outside `Context::with`, which holds the runtime lock.
    fn run_pending_jobs(&self) {
        self.deadline
            .set(self.eval_timeout.map(|limit| Instant::now() + limit));
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => tracing::debug!("promise job threw"),
            }
        }
        self.deadline.set(None);
    }

    /// Runs a whole document. Only JavaScript executes; the document gets its
    /// own block scope so its top-level `let`/`const` do not clash with the
    /// previous run.
    pub fn run(&mut self, language: Language, source: &str) -> RunOutcome {
        if !language.is_executable() {
            return RunOutcome::Unsupported(language);
        }

        let wrapped = format!("{{\n{source}\n}}");
        let mut lines = Vec::new();
        let outcome = match self.evaluate(&wrapped, &mut lines) {
            Evaluation::Thrown(message) => RunOutcome::Error(message),
            Evaluation::Returned(_) if lines.is_empty() => {
                RunOutcome::Output(vec![NO_OUTPUT_SENTINEL.to_string()])
            }
            Evaluation::Returned(_) => RunOutcome::Output(lines),
        };
        tracing::debug!(error = outcome.is_error(), "document run finished");
        outcome
    }
}

fn evaluate_in<'js>(
    ctx: &Ctx<'js>,
    source: &str,
    captured: &Rc<RefCell<Vec<String>>>,
    deadline: &Cell<Option<Instant>>,
    timeout: Option<Duration>,
) -> rquickjs::Result<Evaluation> {
    let harness: Object<'js> = ctx.globals().get(HARNESS)?;
    let attach: Function<'js> = harness.get("attach")?;
    let render: Function<'js> = harness.get("render")?;
    let message_of: Function<'js> = harness.get("messageOf")?;

    let lines = Rc::clone(captured);
    let emit = Function::new(ctx.clone(), move |line: String| {
        lines.borrow_mut().push(line);
    })?;
    let _: Value<'js> = attach.call((emit,))?;

    deadline.set(timeout.map(|limit| Instant::now() + limit));
    let completed = ctx.eval::<Value<'js>, _>(source);
    deadline.set(None);

    match completed {
        Ok(value) => render
            .call::<_, Option<String>>((value,))
            .map(Evaluation::Returned),
        Err(rquickjs::Error::Exception) => {
            let thrown = ctx.catch();
            message_of
                .call::<_, String>((thrown,))
                .map(Evaluation::Thrown)
        }
        Err(error) => Err(error),
    }
}

fn detach_console(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let harness: Object<'_> = ctx.globals().get(HARNESS)?;
    let detach: Function<'_> = harness.get("detach")?;
    detach.call::<_, ()>(())
}

fn describe_engine_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }
    let thrown = ctx.catch();
    if let Some(exception) = thrown.as_exception() {
        return exception
            .message()
            .unwrap_or_else(|| "uncaught exception".to_string());
    }
    thrown
        .as_string()
        .and_then(|text| text.to_string().ok())
        .unwrap_or_else(|| "uncaught exception".to_string())
}
