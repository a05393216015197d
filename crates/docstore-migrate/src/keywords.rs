//! Keyword extraction for the keyword index.

use std::collections::HashMap;

/// Tokens this short or shorter are dropped
pub const MAX_IGNORED_LEN: usize = 3;

/// Lowercased alphanumeric tokens longer than [`MAX_IGNORED_LEN`].
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > MAX_IGNORED_LEN)
        .map(str::to_lowercase)
}

/// The `limit` most frequent tokens with their counts, most frequent first.
/// Ties are broken alphabetically.
pub fn top_keywords(text: &str, limit: usize) -> Vec<(String, u32)> {
    let mut counter = KeywordCounter::default();
    counter.push(text);
    counter.top(limit)
}

/// Token counts over a text fed in parts. A token split across two parts is
/// counted once, as it would be in the concatenated text.
#[derive(Debug, Clone, Default)]
pub struct KeywordCounter {
    counts: HashMap<String, u32>,
    /// Trailing token of the last part, possibly continued by the next
    carry: String,
}

impl KeywordCounter {
    pub fn push(&mut self, part: &str) {
        let mut text = std::mem::take(&mut self.carry);
        text.push_str(part);
        let split = text
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_alphanumeric())
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        self.carry = text[split..].to_string();
        for token in tokenize(&text[..split]) {
            *self.counts.entry(token).or_insert(0) += 1;
        }
    }

    pub fn top(&self, limit: usize) -> Vec<(String, u32)> {
        let mut counts = self.counts.clone();
        for token in tokenize(&self.carry) {
            *counts.entry(token).or_insert(0) += 1;
        }
        let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_strips_punctuation_and_short_words() {
        let tokens: Vec<String> = tokenize("The Rust-lang book, (2nd ed.): ownership!").collect();
        assert_eq!(tokens, vec!["rust", "lang", "book", "ownership"]);
    }

    #[test]
    fn test_top_keywords_ranked() {
        let text = "vector store vector index vector store cache";
        assert_eq!(
            top_keywords(text, 2),
            vec![("vector".to_string(), 3), ("store".to_string(), 2)]
        );
        assert_eq!(top_keywords(text, 10).len(), 4);
        assert!(top_keywords("a an the", 5).is_empty());
    }

    #[test]
    fn test_ties_are_alphabetical() {
        assert_eq!(
            top_keywords("zeta alpha beta", 3),
            vec![
                ("alpha".to_string(), 1),
                ("beta".to_string(), 1),
                ("zeta".to_string(), 1)
            ]
        );
    }

    #[test]
    fn test_counter_joins_tokens_split_across_parts() {
        let text = "ownership and borrowing, ownership rules";
        let mut counter = KeywordCounter::default();
        for part in ["owner", "ship and borr", "owing, ", "ownership rul", "es"] {
            counter.push(part);
        }
        assert_eq!(counter.top(10), top_keywords(text, 10));
    }
}
