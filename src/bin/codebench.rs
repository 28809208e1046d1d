use anyhow::{bail, Context, Result};
use clap::Parser;
use codebench::api::logging::init_tracing;
use codebench::api::ApiClient;
use codebench::config::Config;
use codebench::editor::{EditorSurface, Position, Range};
use codebench::flow::WORKFLOW_PRESETS;
use codebench::sandbox::RunOutcome;
use codebench::{Language, Notice, NoticeLevel, Workbench};
use crossterm::style::Stylize;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "codebench")]
#[command(about = "Terminal code workbench with an embedded JavaScript REPL and AI helpers")]
struct Args {
    /// File to load into the buffer
    file: Option<PathBuf>,

    /// Editor language (javascript, typescript, python, html, css)
    #[arg(short, long)]
    language: Option<String>,

    /// Model name sent to the provider
    #[arg(long, env = "CODEBENCH_MODEL")]
    model: Option<String>,

    /// Provider endpoint
    #[arg(long, env = "CODEBENCH_API_URL")]
    api_url: Option<String>,

    /// Run the buffer once, print its output and exit
    #[arg(long)]
    run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Eval(String),
    Run,
    Explain,
    Fix,
    Complete,
    Workflow(String),
    Workflows,
    Chat(String),
    Lang(String),
    Show,
    Select(Position, Position),
    Cursor(Position),
    Unselect,
    Undo,
    Redo,
    Open(PathBuf),
    Save(Option<PathBuf>),
    History,
    Transcript,
    Clear,
    Flows,
    Help,
    Quit,
    Invalid(String),
}

const HELP: &str = "\
Lines without a leading ':' are evaluated in the JavaScript REPL.

  :run                   run the buffer
  :explain               explain the selection or buffer
  :fix                   fix the selection or buffer
  :complete              complete the code before the cursor
  :workflow <task|n>     apply a task, or preset n from :workflows
  :workflows             list workflow presets
  :chat <message>        ask the assistant
  :lang <language>       switch language (resets the buffer)
  :show                  print the buffer
  :select L:C L:C        select a range
  :cursor L:C            move the cursor
  :unselect              clear the selection
  :undo / :redo          undo or redo an edit
  :open <path>           load a file
  :save [path]           save the buffer
  :history               print the chat history
  :transcript            print the REPL transcript
  :clear                 clear the REPL transcript
  :flows                 list registered flows
  :quit                  exit (Ctrl-D also works)

Ctrl-C cancels a pending AI request.";

fn parse_position(raw: &str) -> Option<Position> {
    let (line, column) = raw.split_once(':')?;
    let line = line.trim().parse::<usize>().ok()?;
    let column = column.trim().parse::<usize>().ok()?;
    (line >= 1 && column >= 1).then(|| Position::new(line, column))
}

fn parse_command(input: &str) -> Command {
    let Some(rest) = input.trim().strip_prefix(':') else {
        return Command::Eval(input.to_string());
    };
    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, argument.trim()),
        None => (rest, ""),
    };

    match name {
        "run" => Command::Run,
        "explain" => Command::Explain,
        "fix" => Command::Fix,
        "complete" => Command::Complete,
        "workflow" => Command::Workflow(argument.to_string()),
        "workflows" => Command::Workflows,
        "chat" => Command::Chat(argument.to_string()),
        "lang" => Command::Lang(argument.to_string()),
        "show" => Command::Show,
        "select" => {
            let mut parts = argument.split_whitespace().map(parse_position);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Some(start)), Some(Some(end)), None) => Command::Select(start, end),
                _ => Command::Invalid("usage: :select L:C L:C".to_string()),
            }
        }
        "cursor" => match parse_position(argument) {
            Some(position) => Command::Cursor(position),
            None => Command::Invalid("usage: :cursor L:C".to_string()),
        },
        "unselect" => Command::Unselect,
        "undo" => Command::Undo,
        "redo" => Command::Redo,
        "open" if !argument.is_empty() => Command::Open(PathBuf::from(argument)),
        "open" => Command::Invalid("usage: :open <path>".to_string()),
        "save" => Command::Save((!argument.is_empty()).then(|| PathBuf::from(argument))),
        "history" => Command::History,
        "transcript" => Command::Transcript,
        "clear" => Command::Clear,
        "flows" => Command::Flows,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => Command::Invalid(format!("unknown command ':{other}' (try :help)")),
    }
}

/// A bare number picks a preset; anything else is the task itself.
fn resolve_workflow_task(argument: &str) -> Option<String> {
    if let Ok(index) = argument.parse::<usize>() {
        return WORKFLOW_PRESETS
            .get(index.checked_sub(1)?)
            .map(|(_, task)| task.to_string());
    }
    Some(argument.to_string())
}

/// Drives `action` to completion. Ctrl-C cancels it instead of killing the
/// shell.
async fn interruptible<T>(cancel: CancellationToken, action: impl Future<Output = T>) -> T {
    tokio::pin!(action);
    loop {
        tokio::select! {
            output = &mut action => return output,
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    cancel.cancel();
                }
            }
        }
    }
}

fn print_notices(bench: &mut Workbench) {
    for notice in bench.take_notices() {
        print_notice(&notice);
    }
}

fn print_notice(notice: &Notice) {
    let title = match notice.level {
        NoticeLevel::Success => notice.title.as_str().green().bold(),
        NoticeLevel::Info => notice.title.as_str().cyan().bold(),
        NoticeLevel::Error => notice.title.as_str().red().bold(),
    };
    println!("{title}: {}", notice.description);
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}

fn print_buffer(bench: &Workbench) {
    let buffer = bench.buffer();
    let width = buffer.line_count().to_string().len();
    for (index, line) in buffer.text().split('\n').enumerate() {
        let number = format!("{:>width$}", index + 1);
        println!("{} {line}", number.dark_grey());
    }

    let cursor = buffer.get_position();
    let mut status = format!(
        "{} | cursor {}:{}",
        bench.language().display_name(),
        cursor.line,
        cursor.column
    );
    if let Some(selection) = buffer.get_selection() {
        status.push_str(&format!(
            " | selection {}:{}-{}:{}",
            selection.start.line, selection.start.column, selection.end.line, selection.end.column
        ));
    }
    println!("{}", status.dark_grey());
}

fn print_run(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Error(_) => {
            for line in outcome.lines() {
                println!("{}", line.red());
            }
        }
        RunOutcome::Output(lines) => print_lines(lines),
        RunOutcome::Unsupported(_) => {}
    }
}

fn prompt(bench: &Workbench) {
    print!("{} ", format!("{}>", bench.language().id()).dark_grey());
    let _ = std::io::stdout().flush();
}

async fn chat(bench: &mut Workbench, message: &str) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        let mut printed = false;
        while let Some(piece) = rx.recv().await {
            print!("{piece}");
            let _ = std::io::stdout().flush();
            printed = true;
        }
        printed
    });

    let cancel = bench.cancel_handle();
    let result = interruptible(cancel, bench.send_chat_message(message, Some(&tx))).await;
    drop(tx);
    let streamed = printer.await.unwrap_or(false);

    match result {
        Ok(reply) if !streamed => println!("{reply}"),
        Ok(_) => println!(),
        Err(error) => {
            if streamed {
                println!();
            }
            tracing::debug!(%error, "chat message failed");
            if let Some(reply) = bench.chat().last_reply() {
                println!("{}", reply.dark_grey());
            }
        }
    }
}

/// Returns false when the shell should exit.
async fn dispatch(bench: &mut Workbench, command: Command, current_file: &mut Option<PathBuf>) -> bool {
    match command {
        Command::Eval(line) => {
            let before = bench.transcript().len();
            if bench.submit_terminal_line(&line) {
                // Skip the echoed command; the user just typed it.
                for entry in bench.transcript().entries().iter().skip(before + 1) {
                    println!("{}", entry.render());
                }
            }
        }
        Command::Run => {
            let outcome = bench.run_code();
            print_run(&outcome);
        }
        Command::Explain => {
            let cancel = bench.cancel_handle();
            let _ = interruptible(cancel, bench.explain_code()).await;
            if !bench.explanation().is_empty() {
                println!("{}", bench.explanation());
            }
        }
        Command::Fix => {
            let cancel = bench.cancel_handle();
            if interruptible(cancel, bench.fix_code()).await.is_ok() {
                print_buffer(bench);
            }
            if !bench.explanation().is_empty() {
                println!("{}", bench.explanation());
            }
        }
        Command::Complete => {
            let cancel = bench.cancel_handle();
            if let Ok(completion) = interruptible(cancel, bench.auto_complete()).await {
                println!("{}", completion.green());
            }
        }
        Command::Workflow(argument) if argument.is_empty() => {
            println!("usage: :workflow <task|n>");
        }
        Command::Workflow(argument) => match resolve_workflow_task(&argument) {
            Some(task) => {
                let cancel = bench.cancel_handle();
                match interruptible(cancel, bench.run_workflow(&task)).await {
                    Ok(_) => print_buffer(bench),
                    Err(error) => tracing::debug!(%error, "workflow failed"),
                }
            }
            None => println!("no workflow preset {argument} (see :workflows)"),
        },
        Command::Workflows => {
            for (index, &(label, task)) in WORKFLOW_PRESETS.iter().enumerate() {
                println!("{} {} {}", format!("{}.", index + 1).bold(), label, task.dark_grey());
            }
        }
        Command::Chat(message) => {
            if message.is_empty() {
                println!("usage: :chat <message>");
            } else {
                chat(bench, &message).await;
            }
        }
        Command::Lang(raw) => match Language::from_id(&raw) {
            Some(language) => {
                bench.switch_language(language);
                *current_file = None;
                print_buffer(bench);
            }
            None => {
                let known: Vec<&str> = Language::ALL.iter().map(|language| language.id()).collect();
                println!("unknown language '{raw}' (one of: {})", known.join(", "));
            }
        },
        Command::Show => print_buffer(bench),
        Command::Select(start, end) => {
            bench.buffer_mut().set_selection(Range::new(start, end));
            print_selection(bench);
        }
        Command::Cursor(position) => {
            bench.buffer_mut().set_position(position);
            let at = bench.buffer().get_position();
            println!("cursor {}:{}", at.line, at.column);
        }
        Command::Unselect => bench.buffer_mut().clear_selection(),
        Command::Undo => {
            if !bench.buffer_mut().undo() {
                println!("nothing to undo");
            }
        }
        Command::Redo => {
            if !bench.buffer_mut().redo() {
                println!("nothing to redo");
            }
        }
        Command::Open(path) => {
            if let Err(error) = bench.open_file(&path) {
                println!("{}", error.to_string().red());
            } else {
                *current_file = Some(path);
                print_buffer(bench);
            }
        }
        Command::Save(path) => match path.or_else(|| current_file.clone()) {
            Some(path) => match bench.save_file(&path) {
                Ok(()) => {
                    println!("saved {}", path.display());
                    *current_file = Some(path);
                }
                Err(error) => println!("{}", error.to_string().red()),
            },
            None => println!("usage: :save <path>"),
        },
        Command::History => {
            for message in bench.chat().messages() {
                println!("{} {}", format!("[{}]", message.role.wire_role()).bold(), message.content);
            }
        }
        Command::Transcript => print_lines(&bench.transcript().lines()),
        Command::Clear => bench.clear_transcript(),
        Command::Flows => {
            for name in bench.flow_names() {
                println!("{name}");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => return false,
        Command::Invalid(message) => println!("{message}"),
    }
    true
}

fn print_selection(bench: &Workbench) {
    let buffer = bench.buffer();
    match buffer.get_selection() {
        Some(selection) => println!("{}", buffer.get_value_in_range(selection).cyan()),
        None => println!("selection is empty"),
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load()?;
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(api_url) = &args.api_url {
        config.api_url = api_url.clone();
    }
    if let Some(raw) = &args.language {
        match Language::from_id(raw) {
            Some(language) => config.language = language,
            None => bail!("Unknown language '{raw}'"),
        }
    }
    Ok(config)
}

fn open_initial(bench: &mut Workbench, path: &Path) -> Result<()> {
    bench
        .open_file(path)
        .with_context(|| format!("could not open {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = load_config(&args)?;

    // Running a file never talks to the provider, so credentials are optional.
    if !args.run {
        config.validate()?;
    }

    let client = ApiClient::new(&config);
    let mut bench = Workbench::new(Arc::new(client), (&config).into())?;
    let mut current_file = args.file.clone();
    if let Some(path) = &args.file {
        open_initial(&mut bench, path)?;
    }

    if args.run {
        let outcome = bench.run_code();
        print_run(&outcome);
        print_notices(&mut bench);
        if outcome.is_error() {
            std::process::exit(1);
        }
        return Ok(());
    }

    println!(
        "{} {} (:help for commands)",
        "codebench".bold(),
        bench.language().display_name().dark_grey()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt(&bench);
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let keep_going = dispatch(&mut bench, parse_command(&line), &mut current_file).await;
        print_notices(&mut bench);
        if !keep_going {
            break;
        }
    }
    Ok(())
}
