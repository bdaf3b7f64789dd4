//! Text utilities shared by the analyzers: term tokenization, sentence
//! splitting and question normalization.

use regex::Regex;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;
use unicode_segmentation::UnicodeSegmentation;

static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(?:https?://|www\.)\S+").unwrap());
static APOSTROPHE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"['\x{2019}]").unwrap());
static PUNCTUATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").unwrap());
static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
/// A run of non-terminators, optionally closed by one terminator.
static SENTENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^.!?\n]+[.!?]?").unwrap());

/// Words too common to say anything about a topic.
const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "her", "was", "one", "our",
    "out", "day", "get", "has", "him", "his", "how", "its", "may", "new", "now", "old", "see",
    "two", "way", "who", "boy", "did", "let", "put", "say", "she", "too", "use", "reddit",
    "subreddit", "this", "that", "with", "have", "from", "they", "will", "what", "when", "where",
    "which", "there", "their", "them", "then", "than", "been", "were", "would", "could",
    "should", "about", "just", "like", "your", "more", "some", "these", "those", "into", "also",
    "only", "very", "much", "any", "does", "doing", "being", "here", "because", "after",
    "before", "over", "other", "such", "each", "most", "even", "really", "know", "think",
    "want", "need", "going", "make", "why", "yes", "got", "had", "off", "own", "same", "still",
    "http", "https", "www", "com", "deleted", "removed",
];

/// Words that open an interrogative sentence.
pub const QUESTION_LEAD_WORDS: &[&str] = &[
    "who", "what", "when", "where", "why", "how", "is", "are", "can", "should", "does", "do",
];

/// Lower-cases text and splits it into analysis terms.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    stop_words: HashSet<String>,
    min_length: usize,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            stop_words: DEFAULT_STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            min_length: 3,
        }
    }

    pub fn add_stop_words(&mut self, words: &[&str]) {
        for word in words {
            self.stop_words.insert(word.to_lowercase());
        }
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = len;
        self
    }

    pub fn is_stop_word(&self, term: &str) -> bool {
        self.stop_words.contains(term)
    }

    /// Terms of `text` in order of appearance, repeats included.
    ///
    /// Links are dropped whole and apostrophes are removed (`don't` becomes
    /// `dont`); terms are Unicode words of the rest.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let without_links = LINK_REGEX.replace_all(text, " ");
        let cleaned = APOSTROPHE_REGEX.replace_all(&without_links, "");

        cleaned
            .unicode_words()
            .map(str::to_lowercase)
            .filter(|word| {
                word.chars().count() >= self.min_length
                    && word.chars().any(char::is_alphabetic)
                    && !self.is_stop_word(word)
            })
            .collect()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits on `.`, `!`, `?` and newlines. Each sentence keeps its terminator;
/// fragments without any alphanumeric character are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    SENTENCE_REGEX
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .filter(|sentence| has_content(sentence))
        .collect()
}

fn has_content(fragment: &str) -> bool {
    fragment.chars().any(char::is_alphanumeric)
}

/// Lower-cases, strips punctuation and collapses whitespace.
pub fn normalize_question(sentence: &str) -> String {
    let lowered = sentence.to_lowercase();
    let without_apostrophes = APOSTROPHE_REGEX.replace_all(&lowered, "");
    let spaced = PUNCTUATION_REGEX.replace_all(&without_apostrophes, " ");
    WHITESPACE_REGEX.replace_all(spaced.trim(), " ").into_owned()
}

/// A sentence is a question if it ends with `?` or opens with a lead word.
pub fn is_question(sentence: &str) -> bool {
    let trimmed = sentence.trim();
    if trimmed.ends_with('?') {
        return true;
    }

    normalize_question(trimmed)
        .split_whitespace()
        .next()
        .map_or(false, |first| QUESTION_LEAD_WORDS.contains(&first))
}

/// Shared tokens over all tokens of the two sets.
pub fn token_set_ratio(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 1.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(text: &str) -> BTreeSet<String> {
        text.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_tokenize_filters_short_and_stop_words() {
        let tokenizer = Tokenizer::new();
        let terms = tokenizer.tokenize("The Prompt is an LLM prompt, and it's GREAT!");
        assert_eq!(terms, vec!["prompt", "llm", "prompt", "great"]);
    }

    #[test]
    fn test_tokenize_drops_links_and_numbers() {
        let tokenizer = Tokenizer::new();
        let terms = tokenizer.tokenize("Ran 10km today, see https://strava.com/x (gpt-4 helped)");
        assert_eq!(terms, vec!["ran", "10km", "today", "gpt", "helped"]);
    }

    #[test]
    fn test_tokenize_unicode_words() {
        let tokenizer = Tokenizer::new();
        let terms = tokenizer.tokenize("Café crème at www.example.com/menu, naïve pacing");
        assert_eq!(terms, vec!["café", "crème", "naïve", "pacing"]);
    }

    #[test]
    fn test_custom_stop_words_and_min_length() {
        let mut tokenizer = Tokenizer::new().min_length(4);
        tokenizer.add_stop_words(&["Running"]);
        assert_eq!(
            tokenizer.tokenize("running for fun and marathon"),
            vec!["marathon"]
        );
    }

    #[test]
    fn test_split_sentences() {
        let text = "How do I start running? I tried once.\nAny tips!  ...";
        assert_eq!(
            split_sentences(text),
            vec!["How do I start running?", "I tried once.", "Any tips!"]
        );
        assert!(split_sentences("").is_empty());
        assert_eq!(split_sentences("no terminator"), vec!["no terminator"]);
    }

    #[test]
    fn test_question_detection_and_normalization() {
        assert!(is_question("How do I start running?"));
        assert!(is_question("how do i start running"));
        assert!(is_question("Should I bulk or cut"));
        assert!(is_question("Anyone else tried this?"));
        assert!(!is_question("I tried once."));
        assert!(!is_question("Howdy folks"));

        assert_eq!(
            normalize_question("How do I   start running?"),
            normalize_question("how do i start running")
        );
        assert_eq!(normalize_question("Don't   skip leg-day!"), "dont skip leg day");
    }

    #[test]
    fn test_token_set_ratio() {
        assert_eq!(token_set_ratio(&set("a b c"), &set("c b a")), 1.0);
        assert_eq!(token_set_ratio(&set("a b"), &set("c d")), 0.0);
        assert!((token_set_ratio(&set("a b c d"), &set("a b c d e")) - 0.8).abs() < 1e-9);
    }
}
