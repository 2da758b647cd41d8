use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored or submitted enum value is outside its known set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

// -- Personas --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonaType {
    Guardian,
    Dependent,
}

string_enum!(PersonaType, "persona type", {
    Guardian => "guardian",
    Dependent => "dependent",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub account_id: Uuid,
    #[serde(rename = "type")]
    pub kind: PersonaType,
    pub display_name: String,
    #[serde(skip_serializing)]
    pub pin_hash: Option<String>,
    pub guardian_persona_id: Option<Uuid>,
    pub avatar: Option<String>,
}

impl Persona {
    /// A guardian has no guardian of its own; a dependent always has one.
    pub fn hierarchy_is_consistent(&self) -> bool {
        match self.kind {
            PersonaType::Guardian => self.guardian_persona_id.is_none(),
            PersonaType::Dependent => self.guardian_persona_id.is_some(),
        }
    }
}

// -- Moderation --

/// Severity level for a configurable category. Ordered from least to most strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    Medium,
    High,
}

string_enum!(Level, "level", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationSettings {
    pub persona_id: Uuid,
    pub topic_restriction_level: Level,
    pub violence_level: Level,
    pub politics_level: Level,
    pub homework_mode_only: bool,
    pub word_filter_enabled: bool,
}

impl ModerationSettings {
    /// Most restrictive levels, applied to a dependent that has never been configured.
    pub fn conservative(persona_id: Uuid) -> Self {
        Self {
            persona_id,
            topic_restriction_level: Level::High,
            violence_level: Level::High,
            politics_level: Level::High,
            homework_mode_only: false,
            word_filter_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomBlacklistEntry {
    pub id: Uuid,
    pub persona_id: Uuid,
    pub word: String,
}

/// Category reported by the guardrail when it blocks or filters content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlagReason {
    Abusive,
    WordFilter,
    Violence,
    Politics,
    Inappropriate,
}

string_enum!(FlagReason, "flag reason", {
    Abusive => "abusive",
    WordFilter => "wordFilter",
    Violence => "violence",
    Politics => "politics",
    Inappropriate => "inappropriate",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: Uuid,
    pub message_id: Uuid,
    pub flagged_by_persona_id: Uuid,
    pub reason: FlagReason,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

// -- Conversations --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

string_enum!(Role, "role", {
    System => "system",
    User => "user",
    Assistant => "assistant",
    Tool => "tool",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    #[default]
    Private,
}

string_enum!(Visibility, "visibility", {
    Public => "public",
    Private => "private",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub account_id: Uuid,
    pub persona_id: Uuid,
    pub title: String,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A chat message as exchanged with clients and the generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
}

// -- Analytics --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageCounters {
    pub chats_started: i64,
    pub messages_sent: i64,
    pub words_sent: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A topic proposed by the extraction capability, relevance in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTopic {
    pub name: String,
    pub relevance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicScore {
    pub topic_id: Uuid,
    pub name: String,
    pub relevance_score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_reason_wire_names() {
        assert_eq!(serde_json::to_string(&FlagReason::WordFilter).unwrap(), "\"wordFilter\"");
        assert_eq!("wordFilter".parse::<FlagReason>().unwrap(), FlagReason::WordFilter);
        assert_eq!(FlagReason::Abusive.as_str(), "abusive");
    }

    #[test]
    fn level_rejects_unknown_values() {
        assert!("extreme".parse::<Level>().is_err());
        assert!(serde_json::from_str::<Level>("\"extreme\"").is_err());
        assert!(Level::Low < Level::Medium && Level::Medium < Level::High);
    }

    #[test]
    fn hierarchy_consistency() {
        let guardian = Persona {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            kind: PersonaType::Guardian,
            display_name: "Parent".into(),
            pin_hash: None,
            guardian_persona_id: None,
            avatar: None,
        };
        assert!(guardian.hierarchy_is_consistent());

        let orphan = Persona { kind: PersonaType::Dependent, ..guardian.clone() };
        assert!(!orphan.hierarchy_is_consistent());
    }
}
