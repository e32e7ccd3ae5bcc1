//! ChatSession: the foreground controller for one database chat.
//!
//! The session owns all committed state: the conversation, token totals, the
//! last query result and the SQL history. Model and database work runs on a
//! background worker thread (one per in-flight request) that holds the agent
//! engine and a snapshot of the conversation. Everything the worker produces
//! comes back over a channel and is committed only by [`ChatSession::poll`]
//! or [`ChatSession::wait`] on the foreground thread.
//!
//! At most one request (turn, draft or manual query) is in flight; a second
//! one is rejected with [`AgentError::Busy`]. A worker that panics still
//! reports back: the engine is returned, the committed conversation is kept
//! as it was, and the failure shows up as a failed completion.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::AgentConfig;
use crate::inference::client::ModelClient;
use crate::inference::types::TokenUsage;
use crate::sql::classifier::classify;
use crate::sql::database::{Database, QueryOutput};
use crate::sql::history::SqlHistory;

use super::agent_loop::AgentLoop;
use super::conversation::ConversationStore;
use super::errors::AgentError;
use super::permissions::AutonomyLevel;
use super::prompts::build_system_prompt;
use super::tool_router::ToolRouter;
use super::types::{TurnEvent, TurnOutcome};

type Engine<M, D> = AgentLoop<M, ToolRouter<D>>;

// ─── Events ─────────────────────────────────────────────────────────────────

/// What the display layer sees after each poll.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Progress from the running turn.
    Turn(TurnEvent),
    TurnCompleted { answer: String, failed: bool },
    DraftReady { query: String },
    DraftFailed { reason: String },
    ManualQueryCompleted { query: String, output: QueryOutput },
}

/// Messages from worker threads to the foreground.
enum WorkerMessage<M: ModelClient, D: Database> {
    Event(TurnEvent),
    TurnFinished {
        engine: Engine<M, D>,
        /// `None` when the turn was abandoned; the committed store stays.
        store: Option<ConversationStore>,
        outcome: TurnOutcome,
    },
    DraftFinished {
        engine: Engine<M, D>,
        result: Result<String, AgentError>,
    },
    ManualQueryFinished {
        query: String,
        output: QueryOutput,
        /// Fresh schema summary when the statement changed the schema.
        schema: Option<String>,
    },
}

impl<M: ModelClient, D: Database> WorkerMessage<M, D> {
    fn is_completion(&self) -> bool {
        !matches!(self, WorkerMessage::Event(_))
    }
}

// ─── ChatSession ────────────────────────────────────────────────────────────

pub struct ChatSession<M, D>
where
    M: ModelClient + 'static,
    D: Database + 'static,
{
    /// `None` while a turn or draft holds it on a worker.
    engine: Option<Engine<M, D>>,
    database: Arc<D>,
    store: ConversationStore,
    usage: TokenUsage,
    sql_history: SqlHistory,
    last_result: Option<QueryOutput>,
    /// Query waiting in the editor: drafted, or halted by the safety policy.
    pending_query: Option<String>,
    manual_query_running: bool,
    cancel: Arc<AtomicBool>,
    tx: Sender<WorkerMessage<M, D>>,
    rx: Receiver<WorkerMessage<M, D>>,
}

impl<M, D> ChatSession<M, D>
where
    M: ModelClient + 'static,
    D: Database + 'static,
{
    /// Build a session whose system prompt describes the current schema.
    pub fn new(model: M, database: Arc<D>, config: &AgentConfig) -> Result<Self, AgentError> {
        let schema = database.schema_summary()?;
        let router = ToolRouter::new(Arc::clone(&database), config.autonomy)
            .with_limits(config.max_result_rows, config.sample_rows);
        let engine = AgentLoop::new(model, router, config.max_history);
        let cancel = engine.cancel_handle();
        let (tx, rx) = mpsc::channel();

        tracing::info!(
            autonomy = u8::from(config.autonomy),
            max_history = config.max_history,
            "chat session created"
        );

        Ok(Self {
            engine: Some(engine),
            database,
            store: ConversationStore::new(build_system_prompt(&schema)),
            usage: TokenUsage::default(),
            sql_history: SqlHistory::new(),
            last_result: None,
            pending_query: None,
            manual_query_running: false,
            cancel,
            tx,
            rx,
        })
    }

    // ─── Requests ───────────────────────────────────────────────────────

    /// Start a chat turn on a worker thread.
    ///
    /// The committed conversation does not change until the turn completes
    /// and is picked up by `poll` or `wait`.
    pub fn submit(&mut self, input: &str) -> Result<(), AgentError> {
        let mut engine = self.take_engine()?;
        self.cancel.store(false, Ordering::SeqCst);

        let mut store = self.store.clone();
        let database = Arc::clone(&self.database);
        let tx = self.tx.clone();
        let input = input.to_string();

        tracing::info!(chars = input.len(), "turn submitted");
        thread::spawn(move || {
            let events_tx = tx.clone();
            let turn = panic::catch_unwind(AssertUnwindSafe(|| -> Result<_, AgentError> {
                let runtime = current_thread_runtime()?;
                match database.schema_summary() {
                    Ok(schema) => store.replace_system_prompt(build_system_prompt(&schema)),
                    Err(e) => tracing::warn!(error = %e, "could not refresh schema summary"),
                }
                Ok(runtime.block_on(engine.run_turn(&mut store, &input, &mut |event| {
                    let _ = events_tx.send(WorkerMessage::Event(event));
                })))
            }));

            let (store, outcome) = match turn {
                Ok(Ok(outcome)) => (Some(store), outcome),
                Ok(Err(e)) => (None, failed_outcome(&e)),
                Err(payload) => {
                    engine.abandon_turn();
                    (None, failed_outcome(&worker_panicked(payload.as_ref())))
                }
            };
            let _ = tx.send(WorkerMessage::TurnFinished {
                engine,
                store,
                outcome,
            });
        });
        Ok(())
    }

    /// Ask the model for a single SQL statement ("use AI for query").
    pub fn draft_query(&mut self, request: &str) -> Result<(), AgentError> {
        let mut engine = self.take_engine()?;
        self.cancel.store(false, Ordering::SeqCst);

        let database = Arc::clone(&self.database);
        let tx = self.tx.clone();
        let request = request.to_string();

        thread::spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                let runtime = current_thread_runtime()?;
                let schema = database.schema_summary().unwrap_or_default();
                runtime.block_on(engine.draft_sql(&request, &schema))
            }))
            .unwrap_or_else(|payload| Err(worker_panicked(payload.as_ref())));
            let _ = tx.send(WorkerMessage::DraftFinished { engine, result });
        });
        Ok(())
    }

    /// Run a statement typed by the user, bypassing the safety policy.
    ///
    /// This is where halted and drafted statements get confirmed. Rejected
    /// with `Busy` while a turn is in flight, since the turn's conversation
    /// would overwrite a schema refresh made here.
    pub fn run_manual_query(&mut self, query: &str) -> Result<(), AgentError> {
        if self.is_busy() {
            return Err(AgentError::Busy);
        }
        self.manual_query_running = true;

        let database = Arc::clone(&self.database);
        let tx = self.tx.clone();
        let query = query.trim().to_string();

        tracing::info!(command = %classify(&query).command_str(), "manual query submitted");
        thread::spawn(move || {
            let (output, schema) = panic::catch_unwind(AssertUnwindSafe(|| {
                let output = database.execute(&query);
                let schema = if !output.is_error() && classify(&query).changes_schema() {
                    database.schema_summary().ok()
                } else {
                    None
                };
                (output, schema)
            }))
            .unwrap_or_else(|payload| {
                let e = worker_panicked(payload.as_ref());
                (QueryOutput::failed(e.to_string()), None)
            });
            let _ = tx.send(WorkerMessage::ManualQueryFinished {
                query,
                output,
                schema,
            });
        });
        Ok(())
    }

    /// Request cancellation of the in-flight turn or draft.
    ///
    /// Returns `false` when nothing is in flight.
    pub fn cancel(&mut self) -> bool {
        if self.engine.is_some() {
            return false;
        }
        tracing::info!("cancel requested");
        self.cancel.store(true, Ordering::SeqCst);
        true
    }

    /// Clear the chat: a fresh system prompt built from the current schema.
    pub fn reset(&mut self) -> Result<(), AgentError> {
        if self.is_busy() {
            return Err(AgentError::Busy);
        }
        let schema = self.database.schema_summary()?;
        self.store.reset(build_system_prompt(&schema));
        self.usage = TokenUsage::default();
        self.pending_query = None;
        tracing::info!("conversation reset");
        Ok(())
    }

    pub fn set_autonomy(&mut self, level: AutonomyLevel) -> Result<(), AgentError> {
        let engine = self.engine.as_mut().ok_or(AgentError::Busy)?;
        engine.handler_mut().set_autonomy(level);
        Ok(())
    }

    /// The engine, unless another request of any kind is in flight.
    fn take_engine(&mut self) -> Result<Engine<M, D>, AgentError> {
        if self.manual_query_running {
            return Err(AgentError::Busy);
        }
        self.engine.take().ok_or(AgentError::Busy)
    }

    // ─── Committing worker output ───────────────────────────────────────

    /// Commit everything workers have sent so far, without blocking.
    pub fn poll(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            self.commit(message, &mut events);
        }
        events
    }

    /// Block until a request completes or `timeout` passes, committing
    /// everything received on the way.
    pub fn wait(&mut self, timeout: Duration) -> Vec<SessionEvent> {
        if !self.is_busy() {
            return self.poll();
        }
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(message) => {
                    let done = message.is_completion();
                    self.commit(message, &mut events);
                    if done {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        events
    }

    fn commit(&mut self, message: WorkerMessage<M, D>, events: &mut Vec<SessionEvent>) {
        match message {
            WorkerMessage::Event(event) => {
                match &event {
                    TurnEvent::QueryExecuted { query, output } => {
                        self.sql_history.push(query);
                        self.last_result = Some(output.clone());
                    }
                    TurnEvent::QueryDrafted { query } | TurnEvent::QueryBlocked { query, .. } => {
                        self.pending_query = Some(query.clone());
                    }
                    _ => {}
                }
                events.push(SessionEvent::Turn(event));
            }
            WorkerMessage::TurnFinished {
                engine,
                store,
                outcome,
            } => {
                self.engine = Some(engine);
                if let Some(store) = store {
                    self.store = store;
                }
                self.usage.add(outcome.usage);
                events.push(SessionEvent::TurnCompleted {
                    answer: outcome.answer,
                    failed: outcome.failed,
                });
            }
            WorkerMessage::DraftFinished { engine, result } => {
                self.engine = Some(engine);
                match result {
                    Ok(query) => {
                        self.pending_query = Some(query.clone());
                        events.push(SessionEvent::DraftReady { query });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "draft failed");
                        events.push(SessionEvent::DraftFailed {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            WorkerMessage::ManualQueryFinished {
                query,
                output,
                schema,
            } => {
                self.manual_query_running = false;
                self.sql_history.push(&query);
                self.last_result = Some(output.clone());
                if let Some(schema) = schema {
                    tracing::info!("schema changed; system prompt refreshed");
                    self.store.replace_system_prompt(build_system_prompt(&schema));
                }
                events.push(SessionEvent::ManualQueryCompleted { query, output });
            }
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    /// Whether a turn, draft or manual query is in flight.
    pub fn is_busy(&self) -> bool {
        self.engine.is_none() || self.manual_query_running
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.store
    }

    /// Token totals across completed turns since the last reset.
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn last_result(&self) -> Option<&QueryOutput> {
        self.last_result.as_ref()
    }

    pub fn pending_query(&self) -> Option<&str> {
        self.pending_query.as_deref()
    }

    pub fn take_pending_query(&mut self) -> Option<String> {
        self.pending_query.take()
    }

    pub fn sql_history(&self) -> &SqlHistory {
        &self.sql_history
    }

    pub fn history_previous(&mut self) -> Option<&str> {
        self.sql_history.previous()
    }

    pub fn history_next(&mut self) -> Option<&str> {
        self.sql_history.next()
    }

    pub fn database(&self) -> &Arc<D> {
        &self.database
    }
}

fn failed_outcome(e: &AgentError) -> TurnOutcome {
    TurnOutcome {
        answer: format!("Error: {e}"),
        usage: TokenUsage::default(),
        tool_calls: 0,
        failed: true,
    }
}

fn worker_panicked(payload: &(dyn Any + Send)) -> AgentError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %message, "worker panicked");
    AgentError::Worker {
        reason: format!("worker panicked: {message}"),
    }
}

fn current_thread_runtime() -> Result<tokio::runtime::Runtime, AgentError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| AgentError::Worker {
            reason: format!("failed to start runtime: {e}"),
        })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
