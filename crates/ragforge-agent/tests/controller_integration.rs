#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Streaming Execution Controller tests: cancellation, detached persistence,
//! error suppression and history handling, driven by a scripted producer.

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use ragforge_agent::{ChatInput, ChatProducer, ChatRequest, FragmentStream, StreamingController};
use ragforge_core::{Fragment, Message, RagError, RagResult, Role};
use ragforge_knowledge::{RagSettings, SharedSettings};
use ragforge_session::{HistoryStore, InMemoryRecordStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const USER: &str = "alice";

/// Streams fixed fragments with a small delay each, optionally failing
/// after `fail_after` of them. Records the history length of every call.
struct Scripted {
    fragments: Vec<&'static str>,
    fail_after: Option<usize>,
    hang_after: Option<usize>,
    seen: Mutex<Vec<ChatInput>>,
}

impl Scripted {
    fn new(fragments: Vec<&'static str>) -> Self {
        Self {
            fragments,
            fail_after: None,
            hang_after: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn history_lengths(&self) -> Vec<usize> {
        self.seen.lock().unwrap().iter().map(|i| i.history.len()).collect()
    }
}

#[async_trait]
impl ChatProducer for Scripted {
    async fn generate(&self, input: &ChatInput) -> RagResult<Message> {
        self.seen.lock().unwrap().push(input.clone());
        Ok(Message::assistant(self.fragments.concat(), ""))
    }

    async fn stream(&self, input: &ChatInput) -> RagResult<FragmentStream> {
        self.seen.lock().unwrap().push(input.clone());
        let mut items: Vec<RagResult<Fragment>> = self
            .fragments
            .iter()
            .enumerate()
            .map(|(i, f)| {
                Ok(if i == 0 {
                    Fragment::assistant(*f)
                } else {
                    Fragment::text(*f)
                })
            })
            .collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(RagError::Llm("connection reset".into())));
        }
        if let Some(n) = self.hang_after {
            items.truncate(n);
            return Ok(Box::pin(stream::iter(items).chain(stream::pending())));
        }
        Ok(Box::pin(stream::iter(items).then(|item| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            item
        })))
    }
}

struct Harness {
    records: Arc<InMemoryRecordStore>,
    settings: SharedSettings,
    shutdown: CancellationToken,
    controller: StreamingController,
}

fn harness() -> Harness {
    let records = Arc::new(InMemoryRecordStore::new());
    let settings = RagSettings::default().shared();
    let shutdown = CancellationToken::new();
    let controller = StreamingController::new(records.clone(), settings.clone(), shutdown.clone());
    Harness {
        records,
        settings,
        shutdown,
        controller,
    }
}

fn turn(conversation_id: &str, query: &str) -> ChatRequest {
    ChatRequest {
        user_id: USER.into(),
        query: query.into(),
        conversation_id: Some(conversation_id.into()),
        debug: false,
    }
}

fn five() -> Scripted {
    Scripted::new(vec!["f0", "f1", "f2", "f3", "f4"])
}

// ---------------------------------------------------------------------------
// 1. Cancellation and detached persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_client_cancel_after_two_fragments_still_persists_all_five() {
    let h = harness();
    let producer = five();
    let cancel = CancellationToken::new();

    let mut chat = h
        .controller
        .stream(turn("c1", "what is rust?"), &producer, cancel.clone())
        .await
        .unwrap();
    assert_eq!(chat.conversation_id.as_deref(), Some("c1"));

    let first = chat.fragments.next().await.unwrap().unwrap();
    let second = chat.fragments.next().await.unwrap().unwrap();
    assert_eq!(first.content, "f0");
    assert_eq!(second.content, "f1");

    cancel.cancel();
    assert!(chat.fragments.next().await.is_none());

    chat.persistence.take().unwrap().await.unwrap();
    let history = h.records.recent_messages("c1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "what is rust?");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "f0f1f2f3f4");
}

#[tokio::test]
async fn test_client_drop_does_not_truncate_transcript() {
    let h = harness();
    let producer = five();

    let mut chat = h
        .controller
        .stream(turn("c1", "hello"), &producer, CancellationToken::new())
        .await
        .unwrap();
    let persistence = chat.persistence.take().unwrap();
    drop(chat);

    persistence.await.unwrap();
    let history = h.records.recent_messages("c1", 10).await.unwrap();
    assert_eq!(history[1].content, "f0f1f2f3f4");
}

#[tokio::test]
async fn test_full_read_matches_persisted_answer() {
    let h = harness();
    let producer = five();

    let mut chat = h
        .controller
        .stream(turn("c1", "hello"), &producer, CancellationToken::new())
        .await
        .unwrap();
    let streamed: String = chat
        .fragments
        .by_ref()
        .map(|f| f.unwrap().content)
        .collect::<Vec<_>>()
        .await
        .concat();
    chat.persistence.take().unwrap().await.unwrap();

    let history = h.records.recent_messages("c1", 10).await.unwrap();
    assert_eq!(history[1].content, streamed);
}

#[tokio::test]
async fn test_shutdown_stops_background_without_persisting() {
    let h = harness();
    let producer = Scripted {
        hang_after: Some(1),
        ..five()
    };

    let mut chat = h
        .controller
        .stream(turn("c1", "hello"), &producer, CancellationToken::new())
        .await
        .unwrap();
    assert!(chat.fragments.next().await.unwrap().is_ok());

    h.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), chat.persistence.take().unwrap())
        .await
        .expect("persistence task should stop on shutdown")
        .unwrap();
    let history = h.records.recent_messages("c1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);
}

// ---------------------------------------------------------------------------
// 2. Error suppression
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_error_before_end_persists_no_answer() {
    let h = harness();
    let producer = Scripted {
        fail_after: Some(3),
        ..five()
    };

    let mut chat = h
        .controller
        .stream(turn("c1", "hello"), &producer, CancellationToken::new())
        .await
        .unwrap();
    let items: Vec<_> = chat.fragments.by_ref().collect().await;
    assert_eq!(items.len(), 4);
    assert!(items[3].is_err());
    chat.persistence.take().unwrap().await.unwrap();

    let history = h.records.recent_messages("c1", 10).await.unwrap();
    assert_eq!(history.len(), 1, "only the question is recorded");
    assert_eq!(history[0].role, Role::User);
}

#[tokio::test]
async fn test_empty_query_is_rejected_before_any_write() {
    let h = harness();
    let producer = five();
    let err = h
        .controller
        .stream(turn("c1", "   "), &producer, CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RagError::Validation(_)));
    assert!(h.records.get_conversation("c1").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// 3. Modes and history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_debug_mode_reads_and_writes_nothing() {
    let h = harness();
    let producer = five();
    let request = ChatRequest {
        debug: true,
        ..turn("c1", "hello")
    };

    let chat = h
        .controller
        .stream(request, &producer, CancellationToken::new())
        .await
        .unwrap();
    assert!(chat.conversation_id.is_none());
    assert!(chat.persistence.is_none());
    let items: Vec<_> = chat.fragments.collect().await;
    assert_eq!(items.len(), 5);

    assert!(h.records.get_conversation("c1").await.unwrap().is_none());
    assert_eq!(producer.history_lengths(), vec![0]);
}

#[tokio::test]
async fn test_second_turn_sees_prior_messages_only() {
    let h = harness();
    let producer = five();

    for query in ["first", "second"] {
        let mut chat = h
            .controller
            .stream(turn("c1", query), &producer, CancellationToken::new())
            .await
            .unwrap();
        chat.persistence.take().unwrap().await.unwrap();
    }

    assert_eq!(producer.history_lengths(), vec![0, 2]);
    let history = h.records.recent_messages("c1", 10).await.unwrap();
    let orders: Vec<i64> = history.iter().map(|m| m.order).collect();
    assert_eq!(orders, vec![1, 2, 3, 4]);
    assert_eq!(history[2].content, "second");
}

#[tokio::test]
async fn test_history_window_bounds_loaded_messages() {
    let h = harness();
    h.settings.write().history_window = 3;
    let producer = five();

    for query in ["one", "two", "three"] {
        let mut chat = h
            .controller
            .stream(turn("c1", query), &producer, CancellationToken::new())
            .await
            .unwrap();
        chat.persistence.take().unwrap().await.unwrap();
    }

    assert_eq!(producer.history_lengths(), vec![0, 2, 3]);
    let seen = producer.seen.lock().unwrap();
    let last: Vec<&str> = seen[2].history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(last, vec!["f0f1f2f3f4", "two", "f0f1f2f3f4"]);
}

#[tokio::test]
async fn test_existing_conversation_is_reused_and_touched() {
    let h = harness();
    let created = h.controller.create_conversation(USER, Some("helper")).await.unwrap();
    assert_eq!(created.title, "New conversation");
    let producer = five();

    let mut chat = h
        .controller
        .stream(turn(&created.id, "hello"), &producer, CancellationToken::new())
        .await
        .unwrap();
    chat.persistence.take().unwrap().await.unwrap();

    let stored = h.records.get_conversation(&created.id).await.unwrap().unwrap();
    assert_eq!(stored.agent_id.as_deref(), Some("helper"));
    assert!(stored.updated_at >= created.updated_at);
    let page = h.controller.list_conversations(USER, 1, 10).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn test_missing_conversation_id_creates_one() {
    let h = harness();
    let producer = five();
    let request = ChatRequest {
        conversation_id: None,
        ..turn("", "a fresh question")
    };

    let mut chat = h
        .controller
        .stream(request, &producer, CancellationToken::new())
        .await
        .unwrap();
    let id = chat.conversation_id.clone().unwrap();
    chat.persistence.take().unwrap().await.unwrap();

    let conversation = h.records.get_conversation(&id).await.unwrap().unwrap();
    assert_eq!(conversation.title, "a fresh question");
    assert_eq!(conversation.user_id, USER);
}

#[tokio::test]
async fn test_foreign_conversation_is_denied() {
    let h = harness();
    let producer = five();
    let mut chat = h
        .controller
        .stream(turn("c1", "mine"), &producer, CancellationToken::new())
        .await
        .unwrap();
    chat.persistence.take().unwrap().await.unwrap();

    let intruder = ChatRequest {
        user_id: "mallory".into(),
        ..turn("c1", "let me in")
    };
    let err = h
        .controller
        .stream(intruder, &producer, CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RagError::Unauthorized(_)));
    assert!(matches!(
        h.controller.history("mallory", "c1", 10).await,
        Err(RagError::Unauthorized(_))
    ));
    assert_eq!(h.controller.history(USER, "c1", 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_generate_persists_question_and_answer() {
    let h = harness();
    let producer = five();

    let answer = h.controller.generate(turn("c1", "hello"), &producer).await.unwrap();
    assert_eq!(answer.conversation_id, "c1");
    assert_eq!(answer.order, 2);

    let history = h.records.recent_messages("c1", 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "f0f1f2f3f4");
}
