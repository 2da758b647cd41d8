use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;

/// Events streamed to the client while a reply is being generated, one JSON
/// object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A new generated message begins
    MessageStart { id: Uuid, role: Role },

    /// Text appended to a message
    TextDelta { id: Uuid, text: String },

    /// The message tripped the guardrail; discard anything shown and render `text`
    MessageReplaced { id: Uuid, text: String },

    /// The turn is complete and persisted
    Finish,

    /// Generation failed; `message` is safe to show
    Error { message: String },
}

impl ChatEvent {
    /// Serialize as a single NDJSON line.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self)
            .unwrap_or_else(|_| r#"{"type":"error","data":{"message":"encoding failed"}}"#.into());
        line.push('\n');
        line
    }
}
