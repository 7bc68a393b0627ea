use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use daia_agent::history::NormalizeOptions;
use daia_agent::pipeline::{
    build_message_flow, Action, ChatModel, DispatchError, FetchError, FetchedHistory, FlowDeps,
    HistorySource, OutgoingMessage, PipelineError, RenderError, RenderedImage, ReplyTarget,
    ResponseSink, SharedContext, TableRenderer,
};
use daia_agent::provider::{Message, ProviderError, Role};
use daia_agent::table::TableData;
use daia_core::settings::{RuntimeSettings, SettingsData};
use daia_core::types::{InboundMessage, RawHistoryEntry};

const BOT_ID: u64 = 1;
const TABLE: &str = "| name | score |\n|---|---|\n| ana | 3 |";

enum History {
    Entries(FetchedHistory),
    Forbidden,
}

struct FakeHistory {
    history: History,
    requested_limit: Mutex<Option<u32>>,
}

impl FakeHistory {
    fn with(entries: Vec<RawHistoryEntry>, table_map: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Self {
            history: History::Entries(FetchedHistory { entries, table_map }),
            requested_limit: Mutex::new(None),
        })
    }

    fn forbidden() -> Arc<Self> {
        Arc::new(Self {
            history: History::Forbidden,
            requested_limit: Mutex::new(None),
        })
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn fetch(
        &self,
        _channel_id: u64,
        _message_id: u64,
        limit: u32,
    ) -> Result<FetchedHistory, FetchError> {
        *self.requested_limit.lock().unwrap() = Some(limit);
        match &self.history {
            History::Entries(h) => Ok(h.clone()),
            History::Forbidden => Err(FetchError::Forbidden("missing access".into())),
        }
    }
}

#[derive(Default)]
struct FakeModel {
    reply: Option<String>,
    calls: Mutex<Vec<(String, String, Vec<Message>)>>,
}

impl FakeModel {
    fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Some(text.to_string()),
            ..Self::default()
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ChatModel for FakeModel {
    fn label(&self) -> &'static str {
        "fake"
    }

    async fn invoke(
        &self,
        prompt: &str,
        system_prompt: &str,
        history: &[Message],
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push((
            prompt.to_string(),
            system_prompt.to_string(),
            history.to_vec(),
        ));
        self.reply.clone().ok_or(ProviderError::Api {
            status: 500,
            message: "upstream exploded".into(),
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    reject: bool,
    sent: Mutex<Vec<(ReplyTarget, OutgoingMessage)>>,
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn deliver(
        &self,
        target: ReplyTarget,
        message: OutgoingMessage,
    ) -> Result<(), DispatchError> {
        if self.reject {
            return Err(DispatchError::Rejected("missing permissions".into()));
        }
        self.sent.lock().unwrap().push((target, message));
        Ok(())
    }
}

struct PngRenderer;

#[async_trait]
impl TableRenderer for PngRenderer {
    async fn render(&self, table: &TableData) -> Result<RenderedImage, RenderError> {
        if table.headers.is_empty() {
            return Err(RenderError("empty header".into()));
        }
        Ok(RenderedImage {
            filename: "whatever.png".into(),
            bytes: b"\x89PNG".to_vec(),
        })
    }
}

struct Harness {
    history: Arc<FakeHistory>,
    model: Arc<FakeModel>,
    sink: Arc<RecordingSink>,
    renderer: Option<Arc<dyn TableRenderer>>,
    max_chars: usize,
}

impl Harness {
    fn new(history: Arc<FakeHistory>, model: Arc<FakeModel>) -> Self {
        Self {
            history,
            model,
            sink: Arc::new(RecordingSink::default()),
            renderer: Some(Arc::new(PngRenderer)),
            max_chars: 2000,
        }
    }

    async fn run(
        &self,
        artifact_dir: &Path,
        message_id: u64,
    ) -> (Result<daia_agent::pipeline::RunOutcome, PipelineError>, SharedContext) {
        let flow = build_message_flow(FlowDeps {
            history: self.history.clone(),
            model: self.model.clone(),
            renderer: self.renderer.clone(),
            sink: self.sink.clone(),
            settings: Arc::new(RuntimeSettings::in_memory(SettingsData::default())),
            base_prompt: "You are a test bot.".into(),
            contextual_prompt: true,
            normalize: NormalizeOptions::default(),
            max_chars: self.max_chars,
            artifact_dir: artifact_dir.to_path_buf(),
        });
        let mut ctx = SharedContext::new(inbound(message_id), BOT_ID, "2025-03-01 12:00:00 +00:00".into());
        let result = flow.run(&mut ctx, &CancellationToken::new()).await;
        (result, ctx)
    }

    fn sent(&self) -> Vec<OutgoingMessage> {
        self.sink
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }
}

fn inbound(message_id: u64) -> InboundMessage {
    InboundMessage {
        message_id,
        channel_id: 900,
        guild_id: Some(800),
        author_id: 7,
        author_name: "ana".into(),
        content: "what are the scores?".into(),
        created_at: Utc::now(),
    }
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[tokio::test]
async fn fetch_failure_skips_the_model_and_posts_a_notice() {
    let h = Harness::new(FakeHistory::forbidden(), FakeModel::replying("unused"));
    let dir = tempfile::tempdir().unwrap();

    let (result, ctx) = h.run(dir.path(), 10).await;
    let outcome = result.unwrap();

    assert_eq!(outcome.visited, vec!["fetch_history", "send_response"]);
    assert_eq!(outcome.action, Action::Sent);
    assert!(h.model.calls.lock().unwrap().is_empty());

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].reply);
    assert_eq!(
        sent[0].content.as_deref(),
        Some("I couldn't read this channel's history, so I can't answer right now.")
    );
    assert_eq!(ctx.delivered, Some(true));
}

#[tokio::test]
async fn plain_reply_goes_through_every_stage() {
    let history = FakeHistory::with(
        vec![
            RawHistoryEntry::from_user(8, 7, "ana", "hello"),
            RawHistoryEntry::from_bot(9, "hi ana"),
        ],
        HashMap::new(),
    );
    let h = Harness::new(history, FakeModel::replying("Three points so far."));
    let dir = tempfile::tempdir().unwrap();

    let (result, _) = h.run(dir.path(), 10).await;
    let outcome = result.unwrap();

    assert_eq!(
        outcome.visited,
        vec![
            "fetch_history",
            "process_history",
            "system_prompt",
            "llm_chat",
            "extract_tables",
            "send_response"
        ]
    );
    assert_eq!(*h.history.requested_limit.lock().unwrap(), Some(12));

    let calls = h.model.calls.lock().unwrap();
    let (prompt, system, turns) = &calls[0];
    assert_eq!(prompt, "ana: what are the scores?");
    assert!(system.starts_with("You are a test bot.\n\nPriority Contextual System Guidance:"));
    assert!(system.contains("Current participants: ana."));
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[1].role, Role::Assistant);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content.as_deref(), Some("Three points so far."));
    assert!(sent[0].files.is_empty());
}

#[tokio::test]
async fn tables_round_trip_through_attachments() {
    let reply = format!("Here you go:\n\n{TABLE}\n\nDone.");
    let h = Harness::new(FakeHistory::with(Vec::new(), HashMap::new()), FakeModel::replying(&reply));
    let dir = tempfile::tempdir().unwrap();

    let (result, ctx) = h.run(dir.path(), 500).await;
    let outcome = result.unwrap();
    assert!(outcome.visited.contains(&"render_tables"));

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let placeholder_text =
        "Here you go:\n\n> `[daia_replaced_table_500_1_as_image]`\n\nDone.".to_string();
    assert_eq!(sent[0].content.as_ref(), Some(&placeholder_text));

    let names: Vec<_> = sent[0].files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["table_1.png", "daia_replaced_table_500_1.md"]);
    assert_eq!(sent[0].files[1].data, TABLE.as_bytes());

    // Artifacts are gone once the reply is out.
    assert_eq!(dir_entries(dir.path()), 0);
    assert!(ctx.artifacts.is_empty());

    // Next turn: the bot's message comes back with its .md attachment
    // resolved, and the model sees the real table again.
    let mut table_map = HashMap::new();
    table_map.insert("500_1".to_string(), TABLE.to_string());
    let history = FakeHistory::with(
        vec![
            RawHistoryEntry::from_user(499, 7, "ana", "show scores"),
            RawHistoryEntry::from_bot(500, &placeholder_text),
        ],
        table_map,
    );
    let next = Harness::new(history, FakeModel::replying("ok"));
    next.run(dir.path(), 501).await.0.unwrap();

    let calls = next.model.calls.lock().unwrap();
    let turns = &calls[0].2;
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, format!("Here you go:\n\n{TABLE}\n\nDone."));
}

#[tokio::test]
async fn without_a_renderer_tables_ship_as_markdown_only() {
    let reply = format!("{TABLE}\n");
    let mut h = Harness::new(FakeHistory::with(Vec::new(), HashMap::new()), FakeModel::replying(&reply));
    h.renderer = None;
    let dir = tempfile::tempdir().unwrap();

    let (result, _) = h.run(dir.path(), 42).await;
    assert_eq!(result.unwrap().action, Action::Sent);

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    let names: Vec<_> = sent[0].files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["daia_replaced_table_42_1.md"]);
}

#[tokio::test]
async fn model_error_aborts_without_sending() {
    let h = Harness::new(FakeHistory::with(Vec::new(), HashMap::new()), FakeModel::failing());
    let dir = tempfile::tempdir().unwrap();

    let (result, ctx) = h.run(dir.path(), 10).await;
    assert!(matches!(result, Err(PipelineError::Model(ProviderError::Api { status: 500, .. }))));
    assert!(h.sent().is_empty());
    assert!(ctx.delivered.is_none());
}

#[tokio::test]
async fn rejected_send_fails_but_still_cleans_up() {
    let reply = format!("Numbers:\n\n{TABLE}\n");
    let mut h = Harness::new(FakeHistory::with(Vec::new(), HashMap::new()), FakeModel::replying(&reply));
    h.sink = Arc::new(RecordingSink {
        reject: true,
        ..RecordingSink::default()
    });
    let dir = tempfile::tempdir().unwrap();

    let (result, ctx) = h.run(dir.path(), 11).await;
    let outcome = result.unwrap();
    assert_eq!(outcome.last_node, "send_response");
    assert_eq!(outcome.action, Action::Failed);
    assert_eq!(ctx.delivered, Some(false));
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn long_reply_is_split_with_reply_first() {
    let reply = "First sentence here. Second sentence here. Third sentence here.";
    let mut h = Harness::new(FakeHistory::with(Vec::new(), HashMap::new()), FakeModel::replying(reply));
    h.max_chars = 25;
    let dir = tempfile::tempdir().unwrap();

    h.run(dir.path(), 12).await.0.unwrap();

    let sent = h.sent();
    assert!(sent.len() >= 2);
    assert!(sent[0].reply);
    assert!(sent[1..].iter().all(|m| !m.reply));
    assert!(sent
        .iter()
        .all(|m| m.content.as_ref().map_or(0, |c| c.chars().count()) <= 25));
}
