//! Shared harness: a real router over an in-memory database, with a scripted
//! generator in place of the model.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use futures_util::StreamExt;
use futures_util::stream;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use guardian_api::analytics::spawn_worker;
use guardian_api::auth::{ApiConfig, AppStateInner};
use guardian_api::entitlement::SubscriptionGate;
use guardian_api::router;
use guardian_db::Database;
use guardian_llm::{EventStream, GenerationEvent, GenerationRequest, Generator, TopicExtractor};
use guardian_types::events::ChatEvent;
use guardian_types::models::{ExtractedTopic, Role, TokenUsage};

/// Replays queued replies in order; falls back to a harmless default.
#[derive(Default)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Vec<GenerationEvent>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
    pace: Mutex<Option<Duration>>,
    pulled: Arc<AtomicUsize>,
}

impl ScriptedGenerator {
    pub fn queue(&self, events: Vec<GenerationEvent>) {
        self.replies.lock().unwrap().push_back(events);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Delay every event by `gap`, like a slow upstream.
    pub fn pace(&self, gap: Duration) {
        *self.pace.lock().unwrap() = Some(gap);
    }

    /// Events handed to consumers so far, across all replies.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> anyhow::Result<EventStream> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| assistant_reply(&["Cats ", "purr ", "when ", "happy."]));
        let gap = *self.pace.lock().unwrap();
        let pulled = self.pulled.clone();
        let stream = stream::iter(events).then(move |event| {
            let pulled = pulled.clone();
            async move {
                if let Some(gap) = gap {
                    tokio::time::sleep(gap).await;
                }
                pulled.fetch_add(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(event)
            }
        });
        Ok(stream.boxed())
    }
}

/// Assistant message streamed in the given chunks, followed by token usage.
pub fn assistant_reply(chunks: &[&str]) -> Vec<GenerationEvent> {
    let id = Uuid::new_v4();
    let mut events = vec![GenerationEvent::MessageStart { id, role: Role::Assistant }];
    events.extend(chunks.iter().map(|c| GenerationEvent::TextDelta { id, text: c.to_string() }));
    events.push(GenerationEvent::Usage(TokenUsage { prompt_tokens: 20, completion_tokens: 7 }));
    events
}

pub struct FixedTopics(pub Vec<ExtractedTopic>);

#[async_trait]
impl TopicExtractor for FixedTopics {
    async fn extract(&self, _transcript: &str) -> Vec<ExtractedTopic> {
        self.0.clone()
    }
}

pub struct Harness {
    pub app: Router,
    pub db: Arc<Database>,
    pub generator: Arc<ScriptedGenerator>,
}

pub struct Family {
    pub account_id: Uuid,
    /// Token carrying the guardian persona claim.
    pub token: String,
    /// Token straight from login, without a persona claim.
    pub account_token: String,
    pub guardian_id: Uuid,
    pub dependent_id: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let generator = Arc::new(ScriptedGenerator::default());
        let extractor = Arc::new(FixedTopics(vec![ExtractedTopic { name: "Cats".into(), relevance: 0.75 }]));
        let (side_effects, _worker) = spawn_worker(db.clone(), extractor);

        let state = Arc::new(AppStateInner {
            db: db.clone(),
            config: ApiConfig {
                jwt_secret: "test-secret".into(),
                token_ttl_days: 1,
                max_dependents: 4,
                max_steps: 5,
                chat_model: "chat".into(),
                reasoning_model: "reasoning".into(),
            },
            generator: generator.clone(),
            entitlement: Arc::new(SubscriptionGate::new(db.clone())),
            side_effects,
        });

        Self { app: router(state), db, generator }
    }

    pub async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, bytes.to_vec())
    }

    pub async fn json(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let (status, bytes) = self.call(method, uri, token, body).await;
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    /// Registered, subscribed account with a guardian session and one dependent.
    pub async fn family(&self) -> Family {
        let email = format!("{}@example.com", Uuid::new_v4());
        let (status, auth) = self
            .json("POST", "/auth/register", None, Some(json!({ "email": email, "password": "correct horse" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let account_id: Uuid = serde_json::from_value(auth["account_id"].clone()).unwrap();
        let account_token = auth["token"].as_str().unwrap().to_string();
        self.db.set_subscription_active(&account_id, true).unwrap();

        let (_, personas) = self.json("GET", "/personas", Some(&account_token), None).await;
        let guardian_id: Uuid = serde_json::from_value(personas[0]["id"].clone()).unwrap();

        let (status, session) = self
            .json(
                "POST",
                "/personas/session",
                Some(&account_token),
                Some(json!({ "persona_id": guardian_id })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = session["token"].as_str().unwrap().to_string();

        let (status, dependent) = self
            .json("POST", "/personas/dependents", Some(&token), Some(json!({ "display_name": "Sam" })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let dependent_id: Uuid = serde_json::from_value(dependent["id"].clone()).unwrap();

        Family {
            account_id,
            token,
            account_token,
            guardian_id,
            dependent_id,
        }
    }

    /// Send one user message and hand back the response without reading it.
    pub async fn open_chat(&self, family: &Family, conversation_id: Uuid, text: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::AUTHORIZATION, format!("Bearer {}", family.token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "conversation_id": conversation_id,
                    "dependent_persona_id": family.dependent_id,
                    "model": "chat-model",
                    "messages": [{ "id": Uuid::new_v4(), "role": "user", "content": text }],
                })
                .to_string(),
            ))
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Send one user message; returns the status and raw body.
    pub async fn chat(&self, family: &Family, conversation_id: Uuid, message_id: Uuid, text: &str) -> (StatusCode, Vec<u8>) {
        self.call(
            "POST",
            "/chat",
            Some(&family.token),
            Some(json!({
                "conversation_id": conversation_id,
                "dependent_persona_id": family.dependent_id,
                "model": "chat-model",
                "messages": [{ "id": message_id, "role": "user", "content": text }],
            })),
        )
        .await
    }

    /// Wait for the side-effects worker to catch up.
    pub async fn eventually<F: Fn() -> bool>(&self, check: F) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }
}

pub fn events(body: &[u8]) -> Vec<ChatEvent> {
    std::str::from_utf8(body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
