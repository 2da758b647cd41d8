//! Incremental screening of a streamed reply.
//!
//! Text is released one completed word at a time, and only after the released
//! prefix passes the reply filter. Once a prefix trips, nothing more of that
//! message is released.

use crate::classifier::{Detection, FilteredReply, Guardrail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStep {
    /// Newly cleared text, safe to show.
    Forward(String),
    /// Waiting for a word to complete, or already tripped.
    Hold,
    /// This delta completed a prefix that failed the filter.
    Tripped(Detection),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateFinish {
    /// Verdict over the full text; this is what gets persisted.
    pub reply: FilteredReply,
    /// Cleared text that was still held back when the stream ended.
    pub flush: Option<String>,
    /// The full text failed even though no streamed prefix did.
    pub tripped_at_end: bool,
}

pub struct ReplyGate<'g> {
    guardrail: &'g Guardrail,
    text: String,
    released: usize,
    tripped: bool,
}

impl<'g> ReplyGate<'g> {
    pub fn new(guardrail: &'g Guardrail) -> Self {
        Self {
            guardrail,
            text: String::new(),
            released: 0,
            tripped: false,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn push(&mut self, delta: &str) -> GateStep {
        self.text.push_str(delta);
        if self.tripped {
            return GateStep::Hold;
        }

        // A word is complete once whitespace follows it.
        let boundary = match self.text.rfind(char::is_whitespace) {
            Some(idx) => idx,
            None => return GateStep::Hold,
        };
        if boundary <= self.released {
            return GateStep::Hold;
        }

        if let Some(detection) = self.guardrail.reply_detection(&self.text[..boundary]) {
            self.tripped = true;
            return GateStep::Tripped(detection);
        }

        let cleared = self.text[self.released..boundary].to_string();
        self.released = boundary;
        GateStep::Forward(cleared)
    }

    pub fn finish(self) -> GateFinish {
        let reply = self.guardrail.filter_reply(&self.text);
        let tripped_at_end = reply.was_filtered() && !self.tripped;
        let flush = if reply.was_filtered() || self.released >= self.text.len() {
            None
        } else {
            Some(self.text[self.released..].to_string())
        };
        GateFinish {
            reply,
            flush,
            tripped_at_end,
        }
    }
}
