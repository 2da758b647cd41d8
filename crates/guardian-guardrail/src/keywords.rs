//! Keyword lists.
//!
//! Violence and politics are tiered: each level is the previous level plus
//! the terms listed for it, so raising strictness only ever adds matches.
//! The abusive and inappropriate lists apply at every setting.

use guardian_types::models::Level;

const VIOLENCE_LOW: &[&str] = &["kill", "murder", "gun", "bomb", "bloodshed", "shooting", "torture"];
const VIOLENCE_MEDIUM: &[&str] = &["fight", "weapon", "attack", "blood", "shoot", "stab", "violent"];
const VIOLENCE_HIGH: &[&str] = &["hit", "hurt", "battle", "war"];

const POLITICS_LOW: &[&str] = &[
    "political party",
    "partisan",
    "liberal agenda",
    "conservative agenda",
    "left wing",
    "right wing",
];
const POLITICS_MEDIUM: &[&str] = &[
    "election",
    "president",
    "vote",
    "democrat",
    "republican",
    "politics",
    "campaign",
    "candidate",
];
const POLITICS_HIGH: &[&str] = &["government", "party", "congress", "policy", "senate"];

/// Insults and profanity.
pub const ABUSIVE: &[&str] = &[
    "idiot",
    "stupid",
    "moron",
    "dumb",
    "loser",
    "jerk",
    "shut up",
    "i hate you",
    "kill yourself",
    "kys",
    "bastard",
    "bitch",
    "asshole",
    "shit",
    "fuck",
    "fucking",
    "damn",
    "crap",
];

/// Topics that stay off limits no matter how the guardian configures things.
pub const INAPPROPRIATE: &[&str] = &[
    // dating / relationships
    "dating",
    "boyfriend",
    "girlfriend",
    "hookup",
    "sex",
    "sexy",
    "porn",
    "nude",
    "nudes",
    // gambling
    "gambling",
    "casino",
    "poker",
    "lottery",
    "sports betting",
    // hacking
    "hack",
    "hacking",
    "malware",
    "phishing",
    "steal password",
    // self-harm
    "suicide",
    "self harm",
    "selfharm",
    "cut myself",
    "kill myself",
    // substances
    "drugs",
    "cocaine",
    "heroin",
    "weed",
    "marijuana",
    "alcohol",
    "vodka",
    "drunk",
    "vape",
    "vaping",
    "cigarette",
];

fn tiered(level: Level, tiers: [&'static [&'static str]; 3]) -> impl Iterator<Item = &'static str> {
    let depth = match level {
        Level::Low => 1,
        Level::Medium => 2,
        Level::High => 3,
    };
    tiers.into_iter().take(depth).flatten().copied()
}

pub fn violence(level: Level) -> impl Iterator<Item = &'static str> {
    tiered(level, [VIOLENCE_LOW, VIOLENCE_MEDIUM, VIOLENCE_HIGH])
}

pub fn politics(level: Level) -> impl Iterator<Item = &'static str> {
    tiered(level, [POLITICS_LOW, POLITICS_MEDIUM, POLITICS_HIGH])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn set(words: impl Iterator<Item = &'static str>) -> HashSet<&'static str> {
        words.collect()
    }

    fn assert_strict_growth(low: HashSet<&str>, medium: HashSet<&str>, high: HashSet<&str>) {
        assert!(low.is_subset(&medium) && medium.len() > low.len());
        assert!(medium.is_subset(&high) && high.len() > medium.len());
    }

    #[test]
    fn tiers_grow_strictly() {
        assert_strict_growth(
            set(violence(Level::Low)),
            set(violence(Level::Medium)),
            set(violence(Level::High)),
        );
        assert_strict_growth(
            set(politics(Level::Low)),
            set(politics(Level::Medium)),
            set(politics(Level::High)),
        );
    }

    #[test]
    fn no_duplicate_terms_within_a_level() {
        let all: Vec<_> = violence(Level::High).chain(politics(Level::High)).collect();
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), unique.len());
    }

    #[test]
    fn always_on_lists_are_normalized_form() {
        for kw in ABUSIVE.iter().chain(INAPPROPRIATE) {
            assert_eq!(crate::normalize(kw), *kw);
        }
    }
}
