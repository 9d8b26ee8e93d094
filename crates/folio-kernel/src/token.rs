//! Word tokenization shared by coverage and diffing.
//!
//! A token is a lowercased run of letters/digits, optionally joined by an
//! inner apostrophe or hyphen (`don't`, `co-op`). Pure punctuation never
//! becomes a token, and duplicates are kept: callers get a sequence, not a set.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\p{L}\p{N}]+(?:['\-][\p{L}\p{N}]+)*").expect("word regex must compile")
    })
}

/// Split text into ordered word tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize_quotes(text).to_lowercase();
    word_re()
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Multiset view of a token sequence.
pub fn token_counts(tokens: &[String]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for token in tokens {
        *counts.entry(token.clone()).or_insert(0) += 1;
    }
    counts
}

fn normalize_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{2018}' | '\u{2019}' | '\u{02BC}' => '\'',
            '\u{2010}' | '\u{2011}' => '-',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_is_discarded() {
        assert_eq!(tokenize("Hello, world! -- ..."), vec!["hello", "world"]);
    }

    #[test]
    fn inner_apostrophes_and_hyphens_stay_in_token() {
        assert_eq!(
            tokenize("The owner\u{2019}s co-op isn't 'quoted'"),
            vec!["the", "owner's", "co-op", "isn't", "quoted"]
        );
    }

    #[test]
    fn punctuation_boundaries_split_words() {
        assert_eq!(tokenize("end.Next (a)b"), vec!["end", "next", "a", "b"]);
    }

    #[test]
    fn duplicates_are_counted() {
        let tokens = tokenize("the cat and the hat");
        let counts = token_counts(&tokens);
        assert_eq!(counts.get("the"), Some(&2));
        assert_eq!(counts.get("cat"), Some(&1));
        assert_eq!(tokens.len(), 5);
    }
}
