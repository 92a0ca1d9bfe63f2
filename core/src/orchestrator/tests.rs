use super::*;
use chrono::Duration;
use crate::inference::InferenceEngine;
use crate::pipeline::{GenerationPipeline, LogitsTensor};
use crate::runtime::{into_handle, load_pipeline};
use crate::session::{InMemoryStore, SessionRepository};
use crate::tokenizer::TextTokenizer;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration as StdDuration;
use tokio::time::timeout;

// Non-zero: a hardcoded 0 pad would show in the engine input
const PAD: u32 = 7;
const VOCAB: usize = 128;

/// Char-code tokenizer with optional scripted entries
#[derive(Default)]
struct StubTokenizer {
    encodings: HashMap<String, Vec<u32>>,
    words: HashMap<u32, String>,
}

impl TextTokenizer for StubTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(self
            .encodings
            .get(text)
            .cloned()
            .unwrap_or_else(|| text.chars().map(|c| c as u32).collect()))
    }

    fn decode(&self, tokens: &[u32]) -> Result<String> {
        let mut out = String::new();
        for &id in tokens.iter().filter(|&&id| id != PAD) {
            match self.words.get(&id) {
                Some(word) => out.push_str(word),
                None => out.extend(char::from_u32(id)),
            }
        }
        Ok(out)
    }

    fn padding_id(&self) -> u32 {
        PAD
    }
}

enum Behavior {
    /// Argmax at each position equals the input id
    Echo,
    /// Argmax spells out these ids, padding after them
    Fixed(Vec<u32>),
    Fail,
    /// Returns a 2-D tensor
    WrongRank,
}

struct StubEngine {
    seq: usize,
    behavior: Behavior,
    calls: AtomicUsize,
    seen: Mutex<Vec<Vec<u32>>>,
    gate: Option<Mutex<mpsc::Receiver<()>>>,
}

impl StubEngine {
    fn new(seq: usize, behavior: Behavior) -> Self {
        Self {
            seq,
            behavior,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    /// Block every run until the returned sender releases it
    fn gated(mut self) -> (Self, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        self.gate = Some(Mutex::new(rx));
        (self, tx)
    }

    fn one_hot(&self, ids: impl Iterator<Item = u32>) -> Result<LogitsTensor> {
        let mut data = vec![0.0f32; self.seq * VOCAB];
        for (pos, id) in ids.enumerate().take(self.seq) {
            data[pos * VOCAB + id as usize] = 1.0;
        }
        LogitsTensor::from_shape_vec(&[1, self.seq, VOCAB], data)
    }
}

impl InferenceEngine for StubEngine {
    fn sequence_length(&self) -> usize {
        self.seq
    }

    fn infer(&self, input: &[u32]) -> Result<LogitsTensor> {
        if let Some(gate) = &self.gate {
            let _ = gate.lock().recv();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(input.to_vec());

        match &self.behavior {
            Behavior::Echo => self.one_hot(input.iter().map(|&id| id % VOCAB as u32)),
            Behavior::Fixed(ids) => {
                self.one_hot(ids.iter().copied().chain(std::iter::repeat(PAD)))
            }
            Behavior::Fail => Err(CellioError::inference("backend error", input.len())),
            Behavior::WrongRank => {
                LogitsTensor::from_shape_vec(&[self.seq, VOCAB], vec![0.0; self.seq * VOCAB])
            }
        }
    }
}

fn orchestrator(
    tokenizer: StubTokenizer,
    engine: Arc<StubEngine>,
) -> (GenerationOrchestrator, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = GenerationPipeline::new(Arc::new(tokenizer), engine);
    let orchestrator = GenerationOrchestrator::new(Ok(Arc::new(pipeline)), store.clone());
    (orchestrator, store)
}

async fn user_message(store: &InMemoryStore, text: &str) -> (SessionId, Message) {
    let session = store.create_session(None).await.unwrap();
    send(store, session.id, text).await
}

async fn send(store: &InMemoryStore, session_id: SessionId, text: &str) -> (SessionId, Message) {
    store
        .append(session_id, Author::User, text.to_string(), Utc::now())
        .await
        .unwrap();
    let message = store.latest_message(session_id).await.unwrap();
    (session_id, message)
}

async fn next_event(events: &mut broadcast::Receiver<GenerationEvent>) -> GenerationEvent {
    timeout(StdDuration::from_secs(5), events.recv())
        .await
        .expect("generation did not finish")
        .unwrap()
}

#[tokio::test]
async fn test_hello_reply_is_persisted() {
    let tokenizer = StubTokenizer {
        encodings: HashMap::from([("Hello".to_string(), vec![15, 42])]),
        words: HashMap::from([(101, "Hi! How can I help?".to_string())]),
    };
    let engine = Arc::new(StubEngine::new(512, Behavior::Fixed(vec![101])));
    let (orchestrator, store) = orchestrator(tokenizer, engine.clone());
    let mut events = orchestrator.subscribe();

    let (session_id, user) = user_message(&store, "Hello").await;
    assert!(orchestrator.generate(session_id, &user));

    let message = match next_event(&mut events).await {
        GenerationEvent::Completed {
            session_id: id,
            message,
        } => {
            assert_eq!(id, session_id);
            message
        }
        GenerationEvent::Failed { error, .. } => panic!("generation failed: {}", error),
    };
    assert_eq!(message.text, "Hi! How can I help?");
    assert_eq!(message.author, Author::Assistant);

    let seen = engine.seen.lock();
    assert_eq!(&seen[0][..4], &[15, 42, 7, 7]);
    let mut expected = vec![15, 42];
    expected.resize(512, PAD);
    assert_eq!(seen[0], expected);
    assert!(!seen[0].contains(&0));
    drop(seen);

    assert_eq!(store.latest_message(session_id).await.unwrap(), message);
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
}

#[tokio::test]
async fn test_long_input_is_truncated_before_inference() {
    let engine = Arc::new(StubEngine::new(512, Behavior::Echo));
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), engine.clone());
    let mut events = orchestrator.subscribe();

    let text: String = "abcdefghij".chars().cycle().take(600).collect();
    let tokens: Vec<u32> = text.chars().map(|c| c as u32).collect();
    let (session_id, user) = user_message(&store, &text).await;
    assert!(orchestrator.generate(session_id, &user));

    match next_event(&mut events).await {
        GenerationEvent::Completed { message, .. } => {
            assert_eq!(message.text, text[..512]);
        }
        GenerationEvent::Failed { error, .. } => panic!("generation failed: {}", error),
    }
    let seen = engine.seen.lock();
    assert_eq!(seen[0].len(), 512);
    assert_eq!(seen[0].as_slice(), &tokens[..512]);
}

#[tokio::test]
async fn test_second_generate_while_running_is_ignored() {
    let (engine, release) = StubEngine::new(64, Behavior::Echo).gated();
    let engine = Arc::new(engine);
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), engine.clone());
    let mut events = orchestrator.subscribe();

    let (session_id, user) = user_message(&store, "ping").await;
    assert!(orchestrator.generate(session_id, &user));
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Running);
    assert!(!orchestrator.generate(session_id, &user));

    release.send(()).unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        GenerationEvent::Completed { .. }
    ));

    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.message_count().await, 2);
    assert!(events.try_recv().is_err());
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
}

#[tokio::test]
async fn test_reply_sorts_after_trigger() {
    let engine = Arc::new(StubEngine::new(32, Behavior::Echo));
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), engine);
    let mut events = orchestrator.subscribe();

    // A trigger stamped ahead of the clock still gets a later reply.
    let session = store.create_session(None).await.unwrap();
    let ahead = Utc::now() + Duration::hours(1);
    store
        .append(session.id, Author::User, "future".into(), ahead)
        .await
        .unwrap();
    let user = store.latest_message(session.id).await.unwrap();

    assert!(orchestrator.generate(session.id, &user));
    let reply = match next_event(&mut events).await {
        GenerationEvent::Completed { message, .. } => message,
        GenerationEvent::Failed { error, .. } => panic!("generation failed: {}", error),
    };

    assert!(reply.timestamp > user.timestamp);
    let stored = store.session(session.id).await.unwrap();
    assert_eq!(stored.latest_message(), Some(&reply));
    assert_eq!(stored.messages.len(), 2);
}

#[tokio::test]
async fn test_missing_artifacts_disable_generation() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::config::ModelConfig {
        model_path: dir.path().join("model.onnx"),
        tokenizer_path: dir.path().join("tokenizer.json"),
        tokenizer_config_path: dir.path().join("tokenizer_config.json"),
        ..Default::default()
    };
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = GenerationOrchestrator::new(into_handle(load_pipeline(&config)), store.clone());
    assert!(!orchestrator.is_enabled());

    let (session_id, user) = user_message(&store, "Hello").await;
    let mut status = orchestrator.watch_status(session_id);

    assert!(!orchestrator.generate(session_id, &user));
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
    assert!(!status.has_changed().unwrap());
    assert_eq!(store.message_count().await, 1);
    assert!(matches!(
        orchestrator.load_error().as_deref(),
        Some(CellioError::ArtifactLoad { .. })
    ));
}

#[tokio::test]
async fn test_sessions_generate_independently() {
    let engine = Arc::new(StubEngine::new(64, Behavior::Echo));
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), engine.clone());
    let mut events = orchestrator.subscribe();

    let (a, user_a) = user_message(&store, "alpha").await;
    let (b, user_b) = user_message(&store, "beta").await;
    assert!(orchestrator.generate(a, &user_a));
    assert!(orchestrator.generate(b, &user_b));

    let mut finished = vec![
        next_event(&mut events).await.session_id(),
        next_event(&mut events).await.session_id(),
    ];
    finished.sort_by_key(|id| id.to_string());
    let mut expected = vec![a, b];
    expected.sort_by_key(|id| id.to_string());
    assert_eq!(finished, expected);

    for (session_id, text) in [(a, "alpha"), (b, "beta")] {
        let session = store.session(session_id).await.unwrap();
        let replies: Vec<&Message> = session
            .messages
            .iter()
            .filter(|m| m.author == Author::Assistant)
            .collect();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].text, text);
    }
    assert_eq!(engine.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_inference_failure_persists_nothing() {
    let engine = Arc::new(StubEngine::new(16, Behavior::Fail));
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), engine);
    let mut events = orchestrator.subscribe();

    let (session_id, user) = user_message(&store, "Hello").await;
    assert!(orchestrator.generate(session_id, &user));

    match next_event(&mut events).await {
        GenerationEvent::Failed { error, .. } => {
            assert!(matches!(*error, CellioError::Inference { input_len: 16, .. }));
        }
        GenerationEvent::Completed { .. } => panic!("failing engine produced a reply"),
    }
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
    assert_eq!(store.message_count().await, 1);

    // The user may simply try again.
    assert!(orchestrator.generate(session_id, &user));
}

#[tokio::test]
async fn test_wrong_rank_logits_abort_generation() {
    let engine = Arc::new(StubEngine::new(8, Behavior::WrongRank));
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), engine);
    let mut events = orchestrator.subscribe();

    let (session_id, user) = user_message(&store, "Hello").await;
    assert!(orchestrator.generate(session_id, &user));

    match next_event(&mut events).await {
        GenerationEvent::Failed { error, .. } => {
            assert!(matches!(*error, CellioError::DecodeShape { .. }));
        }
        GenerationEvent::Completed { .. } => panic!("malformed logits produced a reply"),
    }
    assert_eq!(store.message_count().await, 1);
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
}

#[tokio::test]
async fn test_reply_for_deleted_session_is_dropped() {
    let (engine, release) = StubEngine::new(16, Behavior::Echo).gated();
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), Arc::new(engine));
    let mut events = orchestrator.subscribe();

    let (session_id, user) = user_message(&store, "bye").await;
    assert!(orchestrator.generate(session_id, &user));
    store.delete_session(session_id).await.unwrap();
    release.send(()).unwrap();

    match next_event(&mut events).await {
        GenerationEvent::Failed { error, .. } => {
            assert!(matches!(
                *error,
                CellioError::Store(StoreError::SessionNotFound { .. })
            ));
        }
        GenerationEvent::Completed { .. } => panic!("reply stored for a deleted session"),
    }
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
    assert_eq!(store.message_count().await, 0);

    orchestrator.forget(session_id);
    assert_eq!(orchestrator.status(session_id), GenerationStatus::Idle);
}

#[tokio::test]
async fn test_status_watch_sees_running_then_idle() {
    let (engine, release) = StubEngine::new(16, Behavior::Echo).gated();
    let (orchestrator, store) = orchestrator(StubTokenizer::default(), Arc::new(engine));

    let (session_id, user) = user_message(&store, "hi").await;
    let mut status = orchestrator.watch_status(session_id);
    assert!(orchestrator.generate(session_id, &user));

    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), GenerationStatus::Running);

    release.send(()).unwrap();
    timeout(
        StdDuration::from_secs(5),
        status.wait_for(|s| *s == GenerationStatus::Idle),
    )
    .await
    .expect("status never returned to idle")
    .unwrap();
}

#[test]
fn test_reply_timestamp_is_strictly_later() {
    let now = Utc::now();
    assert!(reply_timestamp(now - Duration::seconds(5), None) > now - Duration::seconds(5));

    let future = now + Duration::minutes(10);
    assert_eq!(
        reply_timestamp(future, None),
        future + Duration::microseconds(1)
    );

    let latest = future + Duration::seconds(1);
    assert!(reply_timestamp(future, Some(latest)) > latest);
}
