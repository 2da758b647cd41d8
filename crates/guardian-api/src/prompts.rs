//! System prompts and per-selector model routing.

use guardian_types::api::ModelSelector;
use guardian_types::models::{Level, ModerationSettings};

use crate::auth::ApiConfig;

/// Side tools offered to the model, except on the reasoning selector.
pub const SIDE_TOOLS: &[&str] = &["get_weather", "create_document", "update_document", "request_suggestions"];

const BASE_PROMPT: &str = "\
You are a cheerful, curious assistant for young children.
Write at a first-grade reading level. Emojis are welcome when they make an answer more fun.
Answer the question, then, when it fits, ask one follow-up question that invites the child to dig deeper.
For a general question, you may offer a short quiz afterwards and give honest feedback on the answers.
Gently correct spelling and grammar in the child's message when it helps them learn.
For personal, sexual, explicit or otherwise sensitive topics, do not give advice or opinions yourself:
tell the child to talk to a trusted adult such as a parent, guardian or teacher, and that their guardian will be told about the question.";

const DOCUMENTS_PROMPT: &str = "\
You can create and update documents with your tools for longer pieces of writing or code.
Do not update a document right after creating it; wait for the child to ask for changes.";

const HOMEWORK_PROMPT: &str = "\
You are in homework mode: a patient helper who guides the student step by step and never gives the final answer.
Ask the student to share the problem if they have not. Break it into small steps and ask guiding questions.
Offer hints when they are stuck, point out mistakes kindly, and check each step before moving on.
If the student asks you to just solve it, remind them that the goal is to learn how.
If a question is not about homework, explain that homework mode is only for schoolwork.";

/// The selector actually used for a turn. Homework-only dependents always get
/// the homework prompt.
pub fn effective_selector(requested: ModelSelector, settings: &ModerationSettings) -> ModelSelector {
    if settings.homework_mode_only {
        ModelSelector::ChatModelHomework
    } else {
        requested
    }
}

pub fn model_for(selector: ModelSelector, config: &ApiConfig) -> String {
    match selector {
        ModelSelector::ChatModelReasoning => config.reasoning_model.clone(),
        ModelSelector::ChatModel | ModelSelector::ChatModelHomework => config.chat_model.clone(),
    }
}

pub fn tools_for(selector: ModelSelector) -> Vec<String> {
    match selector {
        ModelSelector::ChatModelReasoning => Vec::new(),
        _ => SIDE_TOOLS.iter().map(|t| t.to_string()).collect(),
    }
}

/// Label stored with each turn's token usage.
pub fn usage_category(selector: ModelSelector) -> &'static str {
    match selector {
        ModelSelector::ChatModel => "chat-model",
        ModelSelector::ChatModelReasoning => "chat-model-reasoning",
        ModelSelector::ChatModelHomework => "chat-model-homework",
    }
}

pub fn system_prompt(selector: ModelSelector, settings: &ModerationSettings) -> String {
    let mut prompt = match selector {
        ModelSelector::ChatModelReasoning => BASE_PROMPT.to_string(),
        ModelSelector::ChatModel => format!("{}\n\n{}", BASE_PROMPT, DOCUMENTS_PROMPT),
        ModelSelector::ChatModelHomework => {
            format!("{}\n\n{}\n\n{}", BASE_PROMPT, DOCUMENTS_PROMPT, HOMEWORK_PROMPT)
        }
    };

    prompt.push_str("\n\nContent rules set by the child's guardian:\n");
    prompt.push_str(&format!(
        "- Violence: {}\n- Politics: {}\n- General topics: {}\n",
        describe(settings.violence_level),
        describe(settings.politics_level),
        describe(settings.topic_restriction_level),
    ));
    if settings.word_filter_enabled {
        prompt.push_str("- Some words are blocked by the guardian; steer away from them if they come up.\n");
    }
    prompt
}

fn describe(level: Level) -> &'static str {
    match level {
        Level::Low => "avoid graphic or extreme content",
        Level::Medium => "avoid the subject unless it is clearly educational",
        Level::High => "do not discuss it at all",
    }
}
