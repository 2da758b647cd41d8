use guardian_types::models::{FlagReason, ModerationSettings};

use crate::keywords;
use crate::matching::Normalized;

/// Shown in place of any generated reply that trips the filter.
pub const REDIRECT: &str = "Let\u{2019}s talk about something else!";

/// Which list matched, and the keyword as it appears in that list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub reason: FlagReason,
    pub matched: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    Blocked(Detection),
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }
}

/// A generated reply after post-filtering. `text` is either the original
/// reply or [`REDIRECT`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredReply {
    pub text: String,
    pub detection: Option<Detection>,
}

impl FilteredReply {
    pub fn was_filtered(&self) -> bool {
        self.detection.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
enum Category {
    Abusive,
    Custom,
    Violence,
    Politics,
    Inappropriate,
}

// Incoming messages hit the guardian's own words before the tiered lists;
// replies are screened the other way round.
const USER_ORDER: [Category; 5] = [
    Category::Abusive,
    Category::Custom,
    Category::Violence,
    Category::Politics,
    Category::Inappropriate,
];
const REPLY_ORDER: [Category; 5] = [
    Category::Abusive,
    Category::Violence,
    Category::Politics,
    Category::Custom,
    Category::Inappropriate,
];

/// A settings snapshot plus blacklist, ready to classify text.
#[derive(Debug, Clone)]
pub struct Guardrail {
    settings: ModerationSettings,
    blacklist: Vec<String>,
}

impl Guardrail {
    pub fn new(settings: ModerationSettings, blacklist: Vec<String>) -> Self {
        Self { settings, blacklist }
    }

    pub fn settings(&self) -> &ModerationSettings {
        &self.settings
    }

    /// Screen a dependent's message before anything is generated.
    pub fn check_user_message(&self, text: &str) -> Verdict {
        match self.first_match(text, &USER_ORDER) {
            Some(detection) => Verdict::Blocked(detection),
            None => Verdict::Allowed,
        }
    }

    /// Screen a generated reply. Any match replaces the whole reply.
    pub fn filter_reply(&self, text: &str) -> FilteredReply {
        match self.first_match(text, &REPLY_ORDER) {
            Some(detection) => FilteredReply {
                text: REDIRECT.to_string(),
                detection: Some(detection),
            },
            None => FilteredReply {
                text: text.to_string(),
                detection: None,
            },
        }
    }

    /// Reply-order check without building a replacement.
    pub(crate) fn reply_detection(&self, text: &str) -> Option<Detection> {
        self.first_match(text, &REPLY_ORDER)
    }

    fn first_match(&self, text: &str, order: &[Category]) -> Option<Detection> {
        let norm = Normalized::new(text);
        order.iter().find_map(|category| self.check(&norm, *category))
    }

    fn check(&self, norm: &Normalized, category: Category) -> Option<Detection> {
        let (reason, matched) = match category {
            Category::Abusive => (FlagReason::Abusive, norm.find(keywords::ABUSIVE.iter().copied())),
            Category::Custom => {
                if !self.settings.word_filter_enabled {
                    return None;
                }
                (FlagReason::WordFilter, norm.find(self.blacklist.iter().map(String::as_str)))
            }
            Category::Violence => (
                FlagReason::Violence,
                norm.find(keywords::violence(self.settings.violence_level)),
            ),
            Category::Politics => (
                FlagReason::Politics,
                norm.find(keywords::politics(self.settings.politics_level)),
            ),
            Category::Inappropriate => (
                FlagReason::Inappropriate,
                norm.find(keywords::INAPPROPRIATE.iter().copied()),
            ),
        };
        matched.map(|kw| Detection {
            reason,
            matched: kw.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_types::models::Level;
    use uuid::Uuid;

    fn guardrail(violence: Level, politics: Level, word_filter: bool, words: &[&str]) -> Guardrail {
        let mut settings = ModerationSettings::conservative(Uuid::new_v4());
        settings.violence_level = violence;
        settings.politics_level = politics;
        settings.word_filter_enabled = word_filter;
        Guardrail::new(settings, words.iter().map(|w| w.to_string()).collect())
    }

    fn blocked(reason: FlagReason, matched: &str) -> Verdict {
        Verdict::Blocked(Detection {
            reason,
            matched: matched.to_string(),
        })
    }

    #[test]
    fn custom_word_blocks_when_enabled() {
        let g = guardrail(Level::High, Level::High, true, &["minecraft"]);
        assert_eq!(g.check_user_message("I want to play minecraft"), blocked(FlagReason::WordFilter, "minecraft"));
        assert!(g.check_user_message("tell me a joke about cats").is_allowed());
    }

    #[test]
    fn custom_word_ignored_when_disabled() {
        let g = guardrail(Level::High, Level::High, false, &["minecraft"]);
        assert!(g.check_user_message("I want to play minecraft").is_allowed());
    }

    #[test]
    fn abusive_wins_over_politics() {
        let g = guardrail(Level::High, Level::High, true, &["president"]);
        assert_eq!(
            g.check_user_message("the president is an idiot"),
            blocked(FlagReason::Abusive, "idiot")
        );
        assert_eq!(
            g.filter_reply("the president is an idiot").detection.map(|d| d.reason),
            Some(FlagReason::Abusive)
        );
    }

    #[test]
    fn user_and_reply_orders_differ() {
        let g = guardrail(Level::High, Level::High, true, &["volcano"]);
        let text = "a volcano war";
        assert_eq!(g.check_user_message(text), blocked(FlagReason::WordFilter, "volcano"));
        let reply = g.filter_reply(text);
        assert_eq!(reply.detection.map(|d| d.reason), Some(FlagReason::Violence));
    }

    #[test]
    fn level_controls_violence_terms() {
        let low = guardrail(Level::Low, Level::Low, false, &[]);
        let high = guardrail(Level::High, Level::High, false, &[]);
        assert!(low.check_user_message("we played a battle game").is_allowed());
        assert_eq!(
            high.check_user_message("we played a battle game"),
            blocked(FlagReason::Violence, "battle")
        );
        assert_eq!(low.check_user_message("he has a gun"), blocked(FlagReason::Violence, "gun"));
    }

    #[test]
    fn inappropriate_applies_at_every_level() {
        let g = guardrail(Level::Low, Level::Low, false, &[]);
        assert_eq!(
            g.check_user_message("how do I start gambling"),
            blocked(FlagReason::Inappropriate, "gambling")
        );
    }

    #[test]
    fn filtered_reply_is_fully_replaced() {
        let g = guardrail(Level::Medium, Level::Medium, false, &[]);
        let reply = g.filter_reply("Here is how the election works: first...");
        assert!(reply.was_filtered());
        assert_eq!(reply.text, REDIRECT);

        let clean = g.filter_reply("Cats sleep about 15 hours a day.");
        assert!(!clean.was_filtered());
        assert_eq!(clean.text, "Cats sleep about 15 hours a day.");
    }
}
