use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, FlagReason, Level, PersonaType, TopicScore, UsageCounters};

// -- JWT Claims --

/// JWT claims. `guardian_persona_id` is the active guardian context for this
/// credential; it is set only by opening a guardian session and is re-validated
/// against the directory on every privileged request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_persona_id: Option<Uuid>,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResponse {
    pub account_id: Uuid,
    pub token: String,
}

// -- Personas --

#[derive(Debug, Serialize, Deserialize)]
pub struct PersonaSummary {
    pub id: Uuid,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: PersonaType,
    pub avatar: Option<String>,
    pub needs_pin: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateDependentRequest {
    pub display_name: String,
    pub avatar: Option<String>,
    pub pin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenSessionRequest {
    pub persona_id: Uuid,
    pub pin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub guardian_persona_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPinRequest {
    pub pin: String,
}

// -- Chat --

/// Client-facing model choice. Each maps to a configured upstream model and prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelSelector {
    ChatModel,
    ChatModelReasoning,
    ChatModelHomework,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub model: ModelSelector,
    pub dependent_persona_id: Uuid,
}

/// Success envelope returned instead of a stream when the pre-filter blocks a message.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockedResponse {
    pub blocked: bool,
    pub reason: FlagReason,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteConversationQuery {
    pub persona_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

// -- Moderation settings --

/// Partial update; absent fields keep their current value.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSettingsRequest {
    pub topic_restriction_level: Option<Level>,
    pub violence_level: Option<Level>,
    pub politics_level: Option<Level>,
    pub homework_mode_only: Option<bool>,
    pub word_filter_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddBlacklistWordRequest {
    pub word: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateMessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ValidateMessageResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FlagReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_term: Option<String>,
}

// -- Reports --

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageReportResponse {
    pub persona_id: Uuid,
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub usage: UsageCounters,
    pub flags: i64,
    pub top_topics: Vec<TopicScore>,
}
