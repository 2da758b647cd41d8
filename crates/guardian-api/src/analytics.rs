//! Out-of-band analytics: daily usage counters and conversation topics.
//!
//! Jobs carry owned data only and are drained by a background worker started
//! with the server. Failures are logged and dropped; nothing here can reach a
//! response.

use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use guardian_db::Database;
use guardian_llm::TopicExtractor;
use guardian_types::models::{ChatMessage, UsageCounters};

const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    RecordUsage {
        persona_id: Uuid,
        day: NaiveDate,
        delta: UsageCounters,
    },
    ExtractTopics {
        conversation_id: Uuid,
    },
}

/// Handle for queueing side effects. Enqueueing never waits.
#[derive(Clone)]
pub struct SideEffects {
    tx: mpsc::Sender<SideEffect>,
}

impl SideEffects {
    pub fn enqueue(&self, job: SideEffect) {
        if let Err(e) = self.tx.try_send(job) {
            warn!("Dropping side effect: {}", e);
        }
    }
}

/// Start the worker. It exits once every [`SideEffects`] handle is dropped
/// and in-flight jobs have finished.
pub fn spawn_worker(db: Arc<Database>, extractor: Arc<dyn TopicExtractor>) -> (SideEffects, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let handle = tokio::spawn(run_worker(rx, db, extractor));
    (SideEffects { tx }, handle)
}

async fn run_worker(
    mut rx: mpsc::Receiver<SideEffect>,
    db: Arc<Database>,
    extractor: Arc<dyn TopicExtractor>,
) {
    let mut in_flight = JoinSet::new();

    while let Some(job) = rx.recv().await {
        // Topic extraction waits on a model; run jobs side by side so usage
        // counters are not held up behind it.
        in_flight.spawn(run_job(job, db.clone(), extractor.clone()));
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    info!("Side-effects worker stopped");
}

async fn run_job(job: SideEffect, db: Arc<Database>, extractor: Arc<dyn TopicExtractor>) {
    match job {
        SideEffect::RecordUsage { persona_id, day, delta } => {
            let result = tokio::task::spawn_blocking(move || db.add_daily_usage(&persona_id, day, delta)).await;
            match result {
                Ok(Ok(())) => debug!(persona_id = %persona_id, "Usage recorded"),
                Ok(Err(e)) => warn!(persona_id = %persona_id, "Usage update failed: {}", e),
                Err(e) => warn!("Usage task failed: {}", e),
            }
        }
        SideEffect::ExtractTopics { conversation_id } => {
            if let Err(e) = extract_topics(conversation_id, db, extractor).await {
                warn!(conversation_id = %conversation_id, "Topic extraction failed: {}", e);
            }
        }
    }
}

async fn extract_topics(
    conversation_id: Uuid,
    db: Arc<Database>,
    extractor: Arc<dyn TopicExtractor>,
) -> anyhow::Result<()> {
    let reader = db.clone();
    // Flagged content never leaves for the topic model.
    let messages = tokio::task::spawn_blocking(move || reader.get_unflagged_messages(&conversation_id)).await??;
    if messages.is_empty() {
        return Ok(());
    }

    let topics = extractor.extract(&transcript(&messages)).await;
    if topics.is_empty() {
        return Ok(());
    }

    let stored = tokio::task::spawn_blocking(move || db.record_topics(&conversation_id, &topics)).await??;
    debug!(conversation_id = %conversation_id, stored, "Topics merged");
    Ok(())
}

/// Delta for a conversation whose opening message was blocked.
pub fn chat_started_delta() -> UsageCounters {
    UsageCounters {
        chats_started: 1,
        ..UsageCounters::default()
    }
}

/// Delta for one accepted message.
pub fn usage_delta(message: &str, conversation_is_new: bool) -> UsageCounters {
    UsageCounters {
        chats_started: i64::from(conversation_is_new),
        messages_sent: 1,
        words_sent: message.split_whitespace().count() as i64,
    }
}

fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use guardian_types::models::{ExtractedTopic, FlagReason, Role};
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<String>>,
        topics: Vec<ExtractedTopic>,
    }

    #[async_trait]
    impl TopicExtractor for Recording {
        async fn extract(&self, transcript: &str) -> Vec<ExtractedTopic> {
            self.seen.lock().unwrap().push(transcript.to_string());
            self.topics.clone()
        }
    }

    fn setup() -> (Arc<Database>, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let account = Uuid::new_v4();
        db.create_account(&account, "k@example.com", "hash").unwrap();
        let guardian = db.ensure_guardian(&account, &Uuid::new_v4()).unwrap();
        let dependent = match db
            .create_dependent(&Uuid::new_v4(), &account, &guardian.id, "Kid", None, None, 4)
            .unwrap()
        {
            guardian_db::CreateDependentOutcome::Created(p) => p,
            _ => panic!("dependent refused"),
        };
        (db, account, dependent.id)
    }

    #[test]
    fn delta_counts_words_and_new_chats() {
        assert_eq!(
            usage_delta("  tell me   a joke ", true),
            UsageCounters { chats_started: 1, messages_sent: 1, words_sent: 4 }
        );
        assert_eq!(usage_delta("hi", false).chats_started, 0);
        assert_eq!(
            chat_started_delta(),
            UsageCounters { chats_started: 1, messages_sent: 0, words_sent: 0 }
        );
    }

    #[tokio::test]
    async fn worker_applies_jobs_before_exit() {
        let (db, account, dependent) = setup();
        let conv = db.create_conversation(&Uuid::new_v4(), &account, &dependent, "Dinos").unwrap();
        db.insert_message_if_absent(
            &conv.id,
            &ChatMessage { id: Uuid::new_v4(), role: Role::User, content: "tell me about t-rex".into() },
        )
        .unwrap();

        let extractor = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
            topics: vec![ExtractedTopic { name: "Dinosaurs".into(), relevance: 0.8 }],
        });
        let (effects, handle) = spawn_worker(db.clone(), extractor.clone());

        let day = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        effects.enqueue(SideEffect::RecordUsage { persona_id: dependent, day, delta: usage_delta("a b c", true) });
        effects.enqueue(SideEffect::RecordUsage { persona_id: dependent, day, delta: usage_delta("d e", false) });
        effects.enqueue(SideEffect::ExtractTopics { conversation_id: conv.id });
        drop(effects);
        handle.await.unwrap();

        assert_eq!(
            db.get_daily_usage(&dependent, day).unwrap().unwrap(),
            UsageCounters { chats_started: 1, messages_sent: 2, words_sent: 5 }
        );
        let topics = db.conversation_topics(&conv.id).unwrap();
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[0].relevance_score, 80);
        assert_eq!(extractor.seen.lock().unwrap()[0], "user: tell me about t-rex");
    }

    #[tokio::test]
    async fn topic_transcript_skips_flagged_messages() {
        let (db, account, dependent) = setup();
        let conv = db.create_conversation(&Uuid::new_v4(), &account, &dependent, "Owls").unwrap();
        let rude = ChatMessage { id: Uuid::new_v4(), role: Role::User, content: "you are stupid".into() };
        let polite = ChatMessage { id: Uuid::new_v4(), role: Role::User, content: "do owls sleep".into() };
        db.insert_message_if_absent(&conv.id, &rude).unwrap();
        db.insert_message_if_absent(&conv.id, &polite).unwrap();
        db.flag_message(&Uuid::new_v4(), &rude.id, &dependent, FlagReason::Abusive, Some("stupid")).unwrap();

        let extractor = Arc::new(Recording { seen: Mutex::new(Vec::new()), topics: vec![] });
        let (effects, handle) = spawn_worker(db.clone(), extractor.clone());
        effects.enqueue(SideEffect::ExtractTopics { conversation_id: conv.id });
        drop(effects);
        handle.await.unwrap();

        assert_eq!(*extractor.seen.lock().unwrap(), vec!["user: do owls sleep".to_string()]);
    }

    #[tokio::test]
    async fn failing_job_does_not_stop_worker() {
        let (db, _account, dependent) = setup();
        let extractor = Arc::new(Recording { seen: Mutex::new(Vec::new()), topics: vec![] });
        let (effects, handle) = spawn_worker(db.clone(), extractor);

        let day = NaiveDate::from_ymd_opt(2026, 5, 2).unwrap();
        // Unknown persona violates the foreign key.
        effects.enqueue(SideEffect::RecordUsage { persona_id: Uuid::new_v4(), day, delta: usage_delta("x", true) });
        effects.enqueue(SideEffect::ExtractTopics { conversation_id: Uuid::new_v4() });
        effects.enqueue(SideEffect::RecordUsage { persona_id: dependent, day, delta: usage_delta("x", true) });
        drop(effects);
        handle.await.unwrap();

        assert_eq!(db.get_daily_usage(&dependent, day).unwrap().unwrap().messages_sent, 1);
    }
}
