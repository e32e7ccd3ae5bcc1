//! End-to-end session flow: a scripted model driving the SQL tools against a
//! real SQLite database through the worker thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use dbchat::agent_core::{AutonomyLevel, ChatSession, SessionEvent, TurnEvent};
use dbchat::config::{parse_config, AgentConfig};
use dbchat::inference::{
    ChatMessage, DeltaStream, InferenceError, ModelClient, ModelDelta, Role, ToolCallDelta,
    ToolDefinition,
};
use dbchat::render::{plain_text, render};
use dbchat::sql::{Database, SqliteDatabase};

const WAIT: Duration = Duration::from_secs(10);

type Requests = Arc<Mutex<Vec<(Vec<ChatMessage>, bool)>>>;

struct ScriptedModel {
    responses: VecDeque<Vec<ModelDelta>>,
    requests: Requests,
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn send(
        &mut self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<DeltaStream, InferenceError> {
        self.requests.lock().unwrap().push((messages, tools.is_some()));
        let deltas = self.responses.pop_front().unwrap_or_default();
        Ok(stream::iter(deltas.into_iter().map(Ok)).boxed())
    }
}

fn tool_fragment(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> ModelDelta {
    ModelDelta {
        tool_calls: vec![ToolCallDelta {
            index,
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            arguments: Some(args.to_string()),
        }],
        ..ModelDelta::default()
    }
}

fn seeded_database() -> Arc<SqliteDatabase> {
    let db = SqliteDatabase::open(":memory:").unwrap();
    db.execute("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, price REAL)");
    db.execute("INSERT INTO products (name, price) VALUES ('lamp', 19.5), ('desk', 120.0)");
    Arc::new(db)
}

fn session_with(
    responses: Vec<Vec<ModelDelta>>,
    config: &AgentConfig,
) -> (ChatSession<ScriptedModel, SqliteDatabase>, Requests) {
    let requests = Requests::default();
    let model = ScriptedModel {
        responses: responses.into(),
        requests: Arc::clone(&requests),
    };
    let session = ChatSession::new(model, seeded_database(), config).unwrap();
    (session, requests)
}

fn final_answer(events: &[SessionEvent]) -> String {
    events
        .iter()
        .find_map(|e| match e {
            SessionEvent::TurnCompleted { answer, .. } => Some(answer.clone()),
            _ => None,
        })
        .expect("turn did not complete")
}

#[test]
fn test_streamed_tool_turn_end_to_end() {
    let (mut session, requests) = session_with(
        vec![
            vec![
                tool_fragment(0, Some("call_1"), Some("get_table_details"), ""),
                tool_fragment(0, None, None, "{\"table_name\":\"products\"}"),
                tool_fragment(1, Some("call_2"), Some("run_sql_query"), "{\"query\":"),
                tool_fragment(1, None, None, "\"SELECT name FROM products ORDER BY price\"}"),
            ],
            vec![
                ModelDelta::text("The cheapest product is **lamp**,"),
                ModelDelta::text(" then *desk*."),
            ],
        ],
        &AgentConfig::default(),
    );

    session.submit("What is the cheapest product?").unwrap();
    let events = session.wait(WAIT);
    let answer = final_answer(&events);
    assert_eq!(answer, "The cheapest product is **lamp**, then *desk*.");

    let spans = render(&answer);
    assert_eq!(plain_text(&spans), "The cheapest product is lamp, then desk.");

    let executed = session.last_result().unwrap();
    assert_eq!(executed.rows.len(), 2);
    assert_eq!(executed.rows[0][0], "lamp");

    let roles: Vec<Role> = session.conversation().history().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
    );
    let details = session.conversation().history()[3].content_str();
    assert!(details.contains("price"), "{details}");

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].1, "first call offers tools");
    assert!(!requests[1].1, "follow-up offers no tools");
}

#[test]
fn test_draft_only_then_manual_confirmation() {
    let config = parse_config("database:\n  path: \":memory:\"\nagent:\n  autonomy: 1\n")
        .unwrap()
        .agent;
    assert_eq!(config.autonomy, AutonomyLevel::DraftOnly);

    let (mut session, _) = session_with(
        vec![
            vec![tool_fragment(
                0,
                Some("call_1"),
                Some("run_sql_query"),
                "{\"query\":\"SELECT count(*) FROM products\"}",
            )],
            vec![ModelDelta::text("I drafted the query for you.")],
        ],
        &config,
    );

    session.submit("how many products?").unwrap();
    let events = session.wait(WAIT);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Turn(TurnEvent::QueryDrafted { query })
            if query == "SELECT count(*) FROM products"
    )));
    assert!(session.last_result().is_none());

    // The user confirms by running the drafted statement themselves.
    let query = session.take_pending_query().unwrap();
    session.run_manual_query(&query).unwrap();
    let events = session.wait(WAIT);
    match &events[..] {
        [SessionEvent::ManualQueryCompleted { output, .. }] => {
            assert_eq!(output.rows[0][0], 2);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[test]
fn test_destructive_request_leaves_data_untouched() {
    let (mut session, _) = session_with(
        vec![
            vec![tool_fragment(
                0,
                Some("call_1"),
                Some("run_sql_query"),
                "{\"query\":\"/* cleanup */ DROP TABLE products\"}",
            )],
            vec![ModelDelta::text("Dropping a table must be done by you.")],
        ],
        &AgentConfig {
            autonomy: AutonomyLevel::Full,
            ..AgentConfig::default()
        },
    );

    session.submit("drop the products table").unwrap();
    let events = session.wait(WAIT);
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Turn(TurnEvent::QueryBlocked { command, .. }) if command == "DROP"
    )));
    assert_eq!(session.database().list_tables().unwrap(), vec!["products"]);
}

#[test]
fn test_history_is_bounded_across_turns() {
    let responses = (0..10).map(|i| vec![ModelDelta::text(format!("answer {i}"))]).collect();
    let config = AgentConfig {
        max_history: 5,
        ..AgentConfig::default()
    };
    let (mut session, requests) = session_with(responses, &config);

    for i in 0..10 {
        session.submit(&format!("question {i}")).unwrap();
        session.wait(WAIT);
    }

    // Trimmed to 5 when the last question arrived, then the answer landed.
    let history = session.conversation().history();
    assert_eq!(history.len(), 6);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].content_str(), "answer 7");
    assert_eq!(history[5].content_str(), "answer 9");

    // Every request starts with the system prompt and stays within the bound.
    for (messages, _) in requests.lock().unwrap().iter() {
        assert_eq!(messages[0].role, Role::System);
        assert!(messages.len() <= 5);
    }
}
