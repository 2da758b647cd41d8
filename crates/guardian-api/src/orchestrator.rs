//! One chat turn, start to finish.
//!
//! [`admit`] takes a request through authorization, settings, entitlement,
//! conversation lookup and the pre-filter. A blocked message ends there with
//! its flag written. An allowed one becomes a [`Turn`], which [`run_turn`]
//! streams through generation, the reply gate, persistence and flagging on a
//! detached task, then hands off analytics.

use chrono::Utc;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use guardian_db::Database;
use guardian_db::models::UsageRecord;
use guardian_guardrail::{Detection, GateStep, Guardrail, REDIRECT, ReplyGate, Verdict};
use guardian_llm::{GenerationEvent, GenerationRequest};
use guardian_types::api::{BlockedResponse, Claims, SendMessageRequest};
use guardian_types::events::ChatEvent;
use guardian_types::models::{ChatMessage, Conversation, Role, TokenUsage};

use crate::analytics::{SideEffect, chat_started_delta, usage_delta};
use crate::auth::AppState;
use crate::error::{ApiError, blocking};
use crate::middleware::active_guardian;
use crate::prompts;

const MAX_TITLE_CHARS: usize = 80;
const EVENT_BUFFER: usize = 64;
const GENERATION_FAILED: &str = "Something went wrong. Please try again.";

pub enum Admission {
    Blocked(BlockedResponse),
    Allowed(Turn),
}

/// An admitted message, ready for generation. Owns everything the detached
/// task needs.
pub struct Turn {
    pub dependent_id: Uuid,
    pub conversation_id: Uuid,
    pub conversation_is_new: bool,
    pub user_message: ChatMessage,
    pub guardrail: Guardrail,
    pub request: GenerationRequest,
    pub usage_category: &'static str,
}

enum Screening {
    Blocked {
        detection: Detection,
        conversation_is_new: bool,
    },
    Allowed {
        user_message: ChatMessage,
        guardrail: Guardrail,
        conversation_is_new: bool,
    },
}

pub async fn admit(state: &AppState, claims: &Claims, req: SendMessageRequest) -> Result<Admission, ApiError> {
    let guardian_id = active_guardian(claims)?;
    let account_id = claims.sub;
    let dependent_id = req.dependent_persona_id;
    let conversation_id = req.conversation_id;

    let db = state.db.clone();
    let entitlement = state.entitlement.clone();
    let history = req.messages.clone();
    let screening = blocking(move || {
        if !db.authorize_dependent_access(&dependent_id, &guardian_id, &account_id)? {
            return Err(ApiError::Forbidden);
        }

        let user_message = latest_user_message(&history)
            .ok_or_else(|| ApiError::Validation("no user message".into()))?
            .clone();

        let settings = db.resolve_settings(&dependent_id)?;
        let blacklist = db.list_blacklist(&dependent_id)?.into_iter().map(|e| e.word).collect();

        if !entitlement.is_entitled(&account_id)? {
            return Err(ApiError::EntitlementRequired);
        }

        let (_, conversation_is_new) =
            resolve_conversation(&db, &conversation_id, &account_id, &dependent_id, &user_message.content)?;

        let guardrail = Guardrail::new(settings, blacklist);
        match guardrail.check_user_message(&user_message.content) {
            Verdict::Blocked(detection) => {
                // Retries reuse the message id, so the row may already exist.
                db.insert_message_if_absent(&conversation_id, &user_message)?;
                db.flag_message(
                    &Uuid::new_v4(),
                    &user_message.id,
                    &dependent_id,
                    detection.reason,
                    Some(detection.matched.as_str()),
                )?;
                Ok(Screening::Blocked {
                    detection,
                    conversation_is_new,
                })
            }
            Verdict::Allowed => Ok(Screening::Allowed {
                user_message,
                guardrail,
                conversation_is_new,
            }),
        }
    })
    .await?;

    match screening {
        Screening::Blocked {
            detection,
            conversation_is_new,
        } => {
            info!(
                persona_id = %dependent_id,
                conversation_id = %conversation_id,
                reason = %detection.reason,
                "Message blocked"
            );
            // The conversation exists now; later messages will not count it.
            if conversation_is_new {
                state.side_effects.enqueue(SideEffect::RecordUsage {
                    persona_id: dependent_id,
                    day: Utc::now().date_naive(),
                    delta: chat_started_delta(),
                });
            }
            Ok(Admission::Blocked(BlockedResponse {
                blocked: true,
                reason: detection.reason,
                message: REDIRECT.to_string(),
            }))
        }
        Screening::Allowed {
            user_message,
            guardrail,
            conversation_is_new,
        } => {
            let selector = prompts::effective_selector(req.model, guardrail.settings());
            let request = GenerationRequest {
                model: prompts::model_for(selector, &state.config),
                system_prompt: prompts::system_prompt(selector, guardrail.settings()),
                messages: req.messages,
                tools: prompts::tools_for(selector),
                max_steps: state.config.max_steps,
            };
            Ok(Admission::Allowed(Turn {
                dependent_id,
                conversation_id,
                conversation_is_new,
                user_message,
                guardrail,
                request,
                usage_category: prompts::usage_category(selector),
            }))
        }
    }
}

/// Start generation on a detached task and return its event feed. Dropping
/// the receiver stops upstream consumption; whatever was produced is still
/// filtered, persisted and flagged.
pub fn run_turn(state: AppState, turn: Turn) -> mpsc::Receiver<ChatEvent> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    tokio::spawn(drive(state, turn, tx));
    rx
}

struct Draft<'g> {
    id: Uuid,
    role: Role,
    body: Body<'g>,
}

enum Body<'g> {
    Screened(ReplyGate<'g>),
    /// Tool output is stored as produced.
    Passthrough(String),
}

struct Feed {
    tx: mpsc::Sender<ChatEvent>,
    connected: bool,
}

impl Feed {
    async fn send(&mut self, event: ChatEvent) {
        if self.connected && self.tx.send(event).await.is_err() {
            self.connected = false;
        }
    }
}

async fn drive(state: AppState, turn: Turn, tx: mpsc::Sender<ChatEvent>) {
    let Turn {
        dependent_id,
        conversation_id,
        conversation_is_new,
        user_message,
        guardrail,
        request,
        usage_category,
    } = turn;

    let mut feed = Feed { tx, connected: true };
    let mut drafts: Vec<Draft<'_>> = Vec::new();
    let mut usage = TokenUsage::default();

    match state.generator.generate(request).await {
        Ok(mut stream) => {
            loop {
                // A dropped receiver ends generation even while nothing is
                // being forwarded, such as a held partial word or a tripped reply.
                let next = tokio::select! {
                    biased;
                    _ = feed.tx.closed() => {
                        feed.connected = false;
                        None
                    }
                    next = stream.next() => next,
                };
                if !feed.connected {
                    info!(conversation_id = %conversation_id, "Client disconnected, stopping generation");
                    break;
                }
                let Some(event) = next else { break };
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(conversation_id = %conversation_id, "Generation stream failed: {:#}", e);
                        feed.send(ChatEvent::Error { message: GENERATION_FAILED.into() }).await;
                        break;
                    }
                };
                for outgoing in apply(&mut drafts, &guardrail, event, &mut usage) {
                    feed.send(outgoing).await;
                }
                if !feed.connected {
                    info!(conversation_id = %conversation_id, "Client disconnected, stopping generation");
                    break;
                }
            }
        }
        Err(e) => {
            warn!(conversation_id = %conversation_id, "Generation failed to start: {:#}", e);
            feed.send(ChatEvent::Error { message: GENERATION_FAILED.into() }).await;
        }
    }

    // Final verdict on every message, over its full text.
    let mut finalized = vec![user_message.clone()];
    let mut flags: Vec<(Uuid, Detection)> = Vec::new();
    for draft in drafts {
        let content = match draft.body {
            Body::Screened(gate) => {
                let end = gate.finish();
                if end.tripped_at_end {
                    feed.send(ChatEvent::MessageReplaced { id: draft.id, text: REDIRECT.into() }).await;
                }
                if let Some(rest) = end.flush {
                    feed.send(ChatEvent::TextDelta { id: draft.id, text: rest }).await;
                }
                if let Some(detection) = end.reply.detection {
                    flags.push((draft.id, detection));
                }
                end.reply.text
            }
            Body::Passthrough(text) => text,
        };
        if !content.is_empty() {
            finalized.push(ChatMessage { id: draft.id, role: draft.role, content });
        }
    }

    let record = UsageRecord {
        id: Uuid::new_v4(),
        message_id: user_message.id,
        category: usage_category.to_string(),
        usage,
    };
    let db = state.db.clone();
    let persisted = tokio::task::spawn_blocking(move || {
        persist_turn(&db, &conversation_id, &dependent_id, &finalized, &record, &flags)
    })
    .await;

    match persisted {
        Ok(Ok(flag_count)) => {
            if flag_count > 0 {
                info!(conversation_id = %conversation_id, flags = flag_count, "Reply filtered");
            }
            state.side_effects.enqueue(SideEffect::RecordUsage {
                persona_id: dependent_id,
                day: Utc::now().date_naive(),
                delta: usage_delta(&user_message.content, conversation_is_new),
            });
            state.side_effects.enqueue(SideEffect::ExtractTopics { conversation_id });
            feed.send(ChatEvent::Finish).await;
        }
        Ok(Err(e)) => {
            error!(conversation_id = %conversation_id, "Failed to persist turn: {:#}", e);
            feed.send(ChatEvent::Error { message: GENERATION_FAILED.into() }).await;
        }
        Err(e) => {
            error!("spawn_blocking join error: {}", e);
            feed.send(ChatEvent::Error { message: GENERATION_FAILED.into() }).await;
        }
    }
}

/// Messages and usage first, in one transaction; flags only once the rows
/// they point at are committed.
fn persist_turn(
    db: &Database,
    conversation_id: &Uuid,
    dependent_id: &Uuid,
    messages: &[ChatMessage],
    record: &UsageRecord,
    flags: &[(Uuid, Detection)],
) -> anyhow::Result<usize> {
    db.save_turn(conversation_id, messages, Some(record))?;
    for (message_id, detection) in flags {
        db.flag_message(
            &Uuid::new_v4(),
            message_id,
            dependent_id,
            detection.reason,
            Some(detection.matched.as_str()),
        )?;
    }
    Ok(flags.len())
}

fn apply<'g>(
    drafts: &mut Vec<Draft<'g>>,
    guardrail: &'g Guardrail,
    event: GenerationEvent,
    usage: &mut TokenUsage,
) -> Vec<ChatEvent> {
    match event {
        GenerationEvent::MessageStart { id, role } => {
            drafts.push(new_draft(guardrail, id, role));
            vec![ChatEvent::MessageStart { id, role }]
        }
        GenerationEvent::TextDelta { id, text } => {
            let mut out = Vec::new();
            let idx = match drafts.iter().position(|d| d.id == id) {
                Some(idx) => idx,
                None => {
                    drafts.push(new_draft(guardrail, id, Role::Assistant));
                    out.push(ChatEvent::MessageStart { id, role: Role::Assistant });
                    drafts.len() - 1
                }
            };
            match &mut drafts[idx].body {
                Body::Screened(gate) => match gate.push(&text) {
                    GateStep::Forward(cleared) => out.push(ChatEvent::TextDelta { id, text: cleared }),
                    GateStep::Hold => {}
                    GateStep::Tripped(detection) => {
                        debug!(message_id = %id, reason = %detection.reason, "Reply tripped mid-stream");
                        out.push(ChatEvent::MessageReplaced { id, text: REDIRECT.into() });
                    }
                },
                Body::Passthrough(buf) => {
                    buf.push_str(&text);
                    out.push(ChatEvent::TextDelta { id, text });
                }
            }
            out
        }
        GenerationEvent::Usage(delta) => {
            usage.prompt_tokens = usage.prompt_tokens.saturating_add(delta.prompt_tokens);
            usage.completion_tokens = usage.completion_tokens.saturating_add(delta.completion_tokens);
            Vec::new()
        }
    }
}

fn new_draft(guardrail: &Guardrail, id: Uuid, role: Role) -> Draft<'_> {
    let body = if role == Role::Tool {
        Body::Passthrough(String::new())
    } else {
        Body::Screened(ReplyGate::new(guardrail))
    };
    Draft { id, role, body }
}

/// Load the conversation, creating it if this is its first message. Returns
/// whether it was created by this call.
fn resolve_conversation(
    db: &Database,
    conversation_id: &Uuid,
    account_id: &Uuid,
    persona_id: &Uuid,
    first_message: &str,
) -> Result<(Conversation, bool), ApiError> {
    let existing = match db.get_conversation(conversation_id)? {
        Some(c) => c,
        None => match db.create_conversation(conversation_id, account_id, persona_id, &conversation_title(first_message)) {
            Ok(created) => return Ok((created, true)),
            // A concurrent first message may have created it; fall through and check it.
            Err(e) => db.get_conversation(conversation_id)?.ok_or(ApiError::Internal(e))?,
        },
    };

    if existing.persona_id != *persona_id || existing.account_id != *account_id {
        return Err(ApiError::Forbidden);
    }
    if existing.deleted_at.is_some() {
        return Err(ApiError::NotFound);
    }
    Ok((existing, false))
}

fn latest_user_message(messages: &[ChatMessage]) -> Option<&ChatMessage> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && !m.content.trim().is_empty())
}

/// First line of the opening message, trimmed to a title.
pub fn conversation_title(message: &str) -> String {
    let line = message.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    if line.is_empty() {
        return "New conversation".to_string();
    }
    line.chars().take(MAX_TITLE_CHARS).collect()
}
