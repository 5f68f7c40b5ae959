//! Global content filter.
//!
//! The pipeline fixes only the position and contract of this check; the
//! classifier behind [`ContentClassifier`] is replaceable. The default is a
//! keyword/URL classifier: Aho-Corasick categories plus a shortener-domain
//! check, tuned for low false positives.

use aho_corasick::AhoCorasick;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    /// Matches the host of every http(s) link.
    static ref LINK_HOST: Regex =
        Regex::new(r"https?://([^\s/?#]+)").expect("static regex compiles");
}

/// Hosts of every http(s) link in the text, `www.` stripped.
pub fn link_hosts(text: &str) -> impl Iterator<Item = &str> {
    LINK_HOST
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_start_matches("www."))
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentVerdict {
    pub blocked: bool,
    pub category: Option<String>,
}

impl ContentVerdict {
    pub fn clean() -> Self {
        Self {
            blocked: false,
            category: None,
        }
    }

    pub fn blocked(category: &str) -> Self {
        Self {
            blocked: true,
            category: Some(category.to_string()),
        }
    }
}

/// Global content-policy classifier.
#[async_trait]
pub trait ContentClassifier: Send + Sync {
    async fn classify(&self, text: &str, attachment_url: Option<&str>) -> ContentVerdict;
}

/// Default keyword/URL classifier.
pub struct KeywordClassifier {
    matcher: AhoCorasick,
    categories: Vec<&'static str>,
    shorteners: HashSet<&'static str>,
}

/// (pattern, category) pairs for the default rule set.
const KEYWORD_RULES: &[(&str, &str)] = &[
    ("free nitro", "scam"),
    ("free robux", "scam"),
    ("claim your prize", "scam"),
    ("crypto giveaway", "scam"),
    ("steamcommunity.com/gift", "scam"),
    ("@everyone http", "mass_mention"),
];

const SHORTENERS: &[&str] = &["bit.ly", "tinyurl.com", "grabify.link", "iplogger.org"];

/// Terms screened on surfaces that are always SFW (calls pair strangers),
/// independent of any hub's NSFW policy.
const NSFW_TERMS: &[&str] = &["nsfw", "porn", "hentai", "onlyfans", "18+"];

/// Keyword screen for always-SFW surfaces.
///
/// Deliberately separate from [`KeywordClassifier`]: the global filter
/// applies to hubs too, and hubs may permit NSFW.
pub struct NsfwScreen {
    matcher: AhoCorasick,
}

impl NsfwScreen {
    pub fn new() -> Self {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(NSFW_TERMS)
            .expect("static keyword patterns compile");
        Self { matcher }
    }

    /// Whether the text or attachment URL carries a screened term.
    pub fn flags(&self, text: &str, attachment_url: Option<&str>) -> bool {
        self.matcher.find(text).is_some()
            || attachment_url.is_some_and(|url| self.matcher.find(url).is_some())
    }
}

impl Default for NsfwScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordClassifier {
    pub fn new() -> Self {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(KEYWORD_RULES.iter().map(|(p, _)| *p))
            .expect("static keyword patterns compile");

        Self {
            matcher,
            categories: KEYWORD_RULES.iter().map(|(_, c)| *c).collect(),
            shorteners: SHORTENERS.iter().copied().collect(),
        }
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentClassifier for KeywordClassifier {
    async fn classify(&self, text: &str, attachment_url: Option<&str>) -> ContentVerdict {
        if let Some(hit) = self.matcher.find(text) {
            return ContentVerdict::blocked(self.categories[hit.pattern().as_usize()]);
        }

        for host in link_hosts(text) {
            if self.shorteners.contains(host) {
                return ContentVerdict::blocked("link_shortener");
            }
        }

        if let Some(url) = attachment_url
            && let Some(host) = link_hosts(url).next()
            && self.shorteners.contains(host)
        {
            return ContentVerdict::blocked("link_shortener");
        }

        ContentVerdict::clean()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_text_passes() {
        let classifier = KeywordClassifier::new();
        let verdict = classifier.classify("hello hub, how is everyone", None).await;
        assert!(!verdict.blocked);
    }

    #[tokio::test]
    async fn scam_keywords_block_with_category() {
        let classifier = KeywordClassifier::new();
        let verdict = classifier.classify("click for FREE NITRO now", None).await;
        assert_eq!(verdict, ContentVerdict::blocked("scam"));
    }

    #[tokio::test]
    async fn shortener_links_block() {
        let classifier = KeywordClassifier::new();
        let verdict = classifier
            .classify("look https://bit.ly/xyz cool right", None)
            .await;
        assert_eq!(verdict, ContentVerdict::blocked("link_shortener"));
    }

    #[tokio::test]
    async fn ordinary_links_pass() {
        let classifier = KeywordClassifier::new();
        let verdict = classifier
            .classify("docs at https://docs.rs/tokio", None)
            .await;
        assert!(!verdict.blocked);
    }

    #[test]
    fn nsfw_screen_flags_text_and_attachments_only() {
        let screen = NsfwScreen::new();
        assert!(screen.flags("some NSFW thing", None));
        assert!(screen.flags("look", Some("https://cdn.test/hentai.png")));
        assert!(!screen.flags("a perfectly normal message", None));
    }
}
