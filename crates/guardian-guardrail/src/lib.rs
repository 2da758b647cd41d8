//! Keyword guardrail applied to a dependent's messages before generation and
//! to generated replies before they are shown.
//!
//! Classification is a pure function of the text, a settings snapshot and the
//! guardian's custom blacklist. No network, no model.

mod classifier;
mod gate;
pub mod keywords;
mod matching;

pub use classifier::{Detection, FilteredReply, Guardrail, REDIRECT, Verdict};
pub use gate::{GateFinish, GateStep, ReplyGate};
pub use matching::{Normalized, find_match, normalize};
