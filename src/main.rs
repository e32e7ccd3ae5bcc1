use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

use dbchat::agent_core::{
    AgentError, AutonomyLevel, ChatSession, SessionEvent, TurnEvent, TurnState,
};
use dbchat::config::{find_config_path, load_config};
use dbchat::inference::InferenceClient;
use dbchat::render::{render, RenderSpan, SpanStyle, StreamingRenderer};
use dbchat::sql::{QueryOutput, SqliteDatabase};

type Session = ChatSession<InferenceClient, SqliteDatabase>;

/// How long the foreground waits for input before polling the session again.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Rows printed for a query result before eliding the rest.
const MAX_PRINTED_ROWS: usize = 50;

const HELP: &str = "\
Commands:
  <text>            chat with the assistant
  /sql <query>      run a query yourself (no safety gate)
  /sql              run the query waiting in the editor
  /draft <request>  ask for a single SQL statement
  /history          list executed queries
  /prev, /next      recall executed queries
  /autonomy <1-3>   1 = draft only, 2 = moderate, 3 = full
  /clear            start a fresh conversation
  /cancel           stop the running turn
  /quit             exit";

fn main() -> Result<()> {
    let log_path = dbchat::init_tracing().context("failed to initialize logging")?;

    let cwd = std::env::current_dir().context("cannot read current directory")?;
    let config_path = find_config_path(&cwd)?;
    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let database = SqliteDatabase::open(&config.database.path)
        .with_context(|| format!("failed to open database {}", config.database.path))?;
    let client = InferenceClient::from_config(config.model.clone())?;
    let model_name = client.model_name().to_string();
    let mut session = ChatSession::new(client, Arc::new(database), &config.agent)?;

    println!("\x1b[1mdbchat\x1b[0m  {model_name} on {}", config.database.path);
    println!("\x1b[2mlogs: {}  ·  /help for commands\x1b[0m", log_path.display());

    let lines = spawn_stdin_reader();
    let mut display = Display::default();
    print_prompt();

    loop {
        for event in session.poll() {
            display.show(event, &session);
        }

        match lines.recv_timeout(POLL_INTERVAL) {
            Ok(line) => {
                if !handle_line(&mut session, &line) {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                // stdin closed: let the running request finish, then exit.
                while session.is_busy() {
                    for event in session.wait(Duration::from_secs(1)) {
                        display.show(event, &session);
                    }
                }
                break;
            }
        }
    }

    tracing::info!("=== dbchat exiting ===");
    Ok(())
}

// ─── Input ──────────────────────────────────────────────────────────────────

enum Command<'a> {
    Chat(&'a str),
    Sql(Option<&'a str>),
    Draft(&'a str),
    History,
    Previous,
    Next,
    Autonomy(&'a str),
    Clear,
    Cancel,
    Help,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with('/') {
        return Command::Chat(line);
    }

    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match name {
        "/sql" => Command::Sql((!rest.is_empty()).then_some(rest)),
        "/draft" => Command::Draft(rest),
        "/history" => Command::History,
        "/prev" => Command::Previous,
        "/next" => Command::Next,
        "/autonomy" => Command::Autonomy(rest),
        "/clear" => Command::Clear,
        "/cancel" => Command::Cancel,
        "/quit" | "/exit" => Command::Quit,
        _ => Command::Help,
    }
}

/// Act on one input line. Returns `false` to exit.
fn handle_line(session: &mut Session, line: &str) -> bool {
    let result = match parse_command(line) {
        Command::Quit => return false,
        Command::Empty => Ok(()),
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Chat(text) => session.submit(text),
        Command::Draft(request) if request.is_empty() => {
            println!("usage: /draft <request>");
            Ok(())
        }
        Command::Draft(request) => session.draft_query(request),
        Command::Sql(Some(query)) => session.run_manual_query(query),
        Command::Sql(None) => match session.take_pending_query() {
            Some(query) => {
                println!("\x1b[2mrunning: {query}\x1b[0m");
                session.run_manual_query(&query)
            }
            None => {
                println!("no query waiting; usage: /sql <query>");
                Ok(())
            }
        },
        Command::History => {
            for (i, entry) in session.sql_history().entries().iter().enumerate() {
                println!("{:>3}  \x1b[2m{}\x1b[0m  {}", i + 1, entry.executed_at, entry.query);
            }
            Ok(())
        }
        Command::Previous => {
            println!("{}", session.history_previous().unwrap_or("(start of history)"));
            Ok(())
        }
        Command::Next => {
            println!("{}", session.history_next().unwrap_or("(end of history)"));
            Ok(())
        }
        Command::Autonomy(level) => match parse_autonomy(level) {
            Some(level) => session.set_autonomy(level),
            None => {
                println!("usage: /autonomy <1|2|3>");
                Ok(())
            }
        },
        Command::Clear => session.reset().map(|()| println!("\x1b[2mconversation cleared\x1b[0m")),
        Command::Cancel => {
            if session.cancel() {
                println!("\x1b[2mcancelling…\x1b[0m");
            } else {
                println!("nothing to cancel");
            }
            Ok(())
        }
    };

    match result {
        Ok(()) => {
            if !session.is_busy() {
                print_prompt();
            }
        }
        Err(AgentError::Busy) => {
            println!("\x1b[33mbusy: wait for the current request or /cancel\x1b[0m")
        }
        Err(e) => {
            println!("\x1b[31m{e}\x1b[0m");
            print_prompt();
        }
    }
    true
}

fn parse_autonomy(level: &str) -> Option<AutonomyLevel> {
    let level = level.parse::<u8>().ok()?;
    AutonomyLevel::try_from(level).ok()
}

fn spawn_stdin_reader() -> Receiver<String> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

fn print_prompt() {
    print!("\x1b[1;34m›\x1b[0m ");
    let _ = io::stdout().flush();
}

// ─── Output ─────────────────────────────────────────────────────────────────

/// Paints session events; streamed answers are rendered line by line.
#[derive(Default)]
struct Display {
    stream: StreamingRenderer,
    /// Bytes of rendered text already printed from `stream`.
    printed: usize,
    streamed_any: bool,
}

impl Display {
    fn show(&mut self, event: SessionEvent, session: &Session) {
        match event {
            SessionEvent::Turn(TurnEvent::Token { text }) => {
                self.streamed_any = true;
                self.stream.push(&text);
                paint_new(self.stream.committed_spans(), &mut self.printed);
            }
            SessionEvent::Turn(TurnEvent::StateChanged { state }) => {
                if state == TurnState::ExecutingTools || state == TurnState::AwaitingFollowup {
                    self.finish_stream();
                }
            }
            SessionEvent::Turn(TurnEvent::ToolStarted { name, arguments }) => {
                println!("\x1b[2m⚙ {name} {arguments}\x1b[0m");
            }
            SessionEvent::Turn(TurnEvent::QueryDrafted { query }) => {
                println!("\x1b[36mdraft (not run):\x1b[0m {query}\n\x1b[2mrun it with /sql\x1b[0m");
            }
            SessionEvent::Turn(TurnEvent::QueryBlocked { command, query }) => {
                println!("\x1b[33m⚠ {command} was not executed:\x1b[0m {query}");
                println!("\x1b[2mreview it, then run it with /sql\x1b[0m");
            }
            SessionEvent::Turn(TurnEvent::QueryExecuted { output, .. }) => print_output(&output),
            SessionEvent::Turn(TurnEvent::ClarificationRequested { question }) => {
                println!("\x1b[1;35m?\x1b[0m {question}");
            }
            SessionEvent::TurnCompleted { answer, failed } => {
                self.finish_stream();
                if failed {
                    println!("\x1b[31m{answer}\x1b[0m");
                } else if !self.streamed_any {
                    let mut printed = 0;
                    paint_new(&render(&answer), &mut printed);
                    println!();
                }
                self.streamed_any = false;
                let usage = session.usage();
                println!(
                    "\x1b[2m{} in / {} out tokens\x1b[0m",
                    usage.input_tokens, usage.output_tokens
                );
                print_prompt();
            }
            SessionEvent::DraftReady { query } => {
                println!("\x1b[36mdraft:\x1b[0m {query}\n\x1b[2mrun it with /sql\x1b[0m");
                print_prompt();
            }
            SessionEvent::DraftFailed { reason } => {
                println!("\x1b[31mdraft failed: {reason}\x1b[0m");
                print_prompt();
            }
            SessionEvent::ManualQueryCompleted { output, .. } => {
                print_output(&output);
                print_prompt();
            }
        }
    }

    /// Paint the unfinished tail of the streamed answer and start over.
    fn finish_stream(&mut self) {
        if self.stream.text().is_empty() {
            return;
        }
        paint_new(&self.stream.spans(), &mut self.printed);
        if !self.stream.text().ends_with('\n') {
            println!();
        }
        self.stream.clear();
        self.printed = 0;
    }
}

/// Print the part of `spans` past the first `printed` bytes of text.
fn paint_new(spans: &[RenderSpan], printed: &mut usize) {
    let mut offset = 0;
    let mut out = String::new();
    for span in spans {
        let end = offset + span.text.len();
        if end > *printed {
            let start = printed.saturating_sub(offset);
            out.push_str(&styled(&span.text[start..], span.style));
        }
        offset = end;
    }
    *printed = offset.max(*printed);
    print!("{out}");
    let _ = io::stdout().flush();
}

fn styled(text: &str, style: SpanStyle) -> String {
    let code = match style {
        SpanStyle::Plain | SpanStyle::TableCell | SpanStyle::ListItem { .. } => {
            return text.to_string()
        }
        SpanStyle::Bold => "1",
        SpanStyle::Italic => "3",
        SpanStyle::BoldItalic => "1;3",
        SpanStyle::Strikethrough => "9",
        SpanStyle::InlineCode => "36",
        SpanStyle::CodeBlock => "32",
        SpanStyle::Header(1) => "1;4",
        SpanStyle::Header(_) => "1",
        SpanStyle::Blockquote => "2;3",
        SpanStyle::Link => "4;34",
        SpanStyle::HorizontalRule => "38;5;240",
    };
    format!("\x1b[{code}m{text}\x1b[0m")
}

fn print_output(output: &QueryOutput) {
    if let Some(error) = &output.error {
        println!("\x1b[31mSQL error: {error}\x1b[0m");
        return;
    }
    if output.columns.is_empty() {
        println!("\x1b[2m{} row(s) affected\x1b[0m", output.rows_affected.unwrap_or(0));
        return;
    }

    println!("\x1b[1m{}\x1b[0m", output.columns.join(" │ "));
    for row in output.rows.iter().take(MAX_PRINTED_ROWS) {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        println!("{}", cells.join(" │ "));
    }
    if output.rows.len() > MAX_PRINTED_ROWS {
        println!("\x1b[2m… {} more\x1b[0m", output.rows.len() - MAX_PRINTED_ROWS);
    }
    println!("\x1b[2m({} rows)\x1b[0m", output.rows.len());
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
