/// Lowercase, drop punctuation, collapse runs of whitespace.
///
/// Letters, digits and `_` survive; everything else that is not whitespace is
/// removed, so "Don't!" becomes "dont".
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text prepared once for matching against many keyword lists.
#[derive(Debug, Clone)]
pub struct Normalized {
    words: Vec<String>,
}

impl Normalized {
    pub fn new(text: &str) -> Self {
        Self {
            words: normalize(text).split(' ').filter(|w| !w.is_empty()).map(str::to_owned).collect(),
        }
    }

    /// True if the normalized keyword occurs as a run of whole words.
    pub fn contains(&self, keyword: &str) -> bool {
        let needle = normalize(keyword);
        if needle.is_empty() {
            return false;
        }
        let needle: Vec<&str> = needle.split(' ').collect();
        self.words
            .windows(needle.len())
            .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
    }

    /// First keyword, in list order, that matches. Returns the keyword as given.
    pub fn find<'k, I>(&self, keywords: I) -> Option<&'k str>
    where
        I: IntoIterator<Item = &'k str>,
    {
        keywords.into_iter().find(|kw| self.contains(kw))
    }
}

pub fn find_match<'k, I>(text: &str, keywords: I) -> Option<&'k str>
where
    I: IntoIterator<Item = &'k str>,
{
    Normalized::new(text).find(keywords)
}
