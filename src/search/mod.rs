//! Query-side text utilities shared by validation and the simple lexical
//! backend.

pub mod ranker;

use once_cell::sync::Lazy;
use regex::Regex;

// Token splitting rule: split the lowercased string on runs of characters
// that are neither letters nor digits (Unicode property based).
static TOKEN_SPLIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}\p{N}]+").expect("token split regex"));

/// Lowercase, split on non-alphanumeric runs, discard empty tokens.
pub fn tokenize(s: &str) -> Vec<String> {
    let lowered = s.to_lowercase();
    TOKEN_SPLIT_RE
        .split(&lowered)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token-containment score used by the simple backend: each query token
/// contributes its occurrence count in the lowercased text.
pub fn lexical_score(query_tokens: &[String], text: &str) -> f64 {
    if query_tokens.is_empty() || text.is_empty() {
        return 0.0;
    }
    let lc = text.to_lowercase();
    let mut score = 0.0;
    for token in query_tokens {
        score += lc.matches(token.as_str()).count() as f64;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_punctuation_and_lowercases() {
        assert_eq!(
            tokenize("Cache-Invalidation: strategy, TTL!"),
            vec!["cache", "invalidation", "strategy", "ttl"]
        );
    }

    #[test]
    fn tokenize_keeps_unicode_letters_and_digits() {
        assert_eq!(tokenize("naïve café42"), vec!["naïve", "café42"]);
    }

    #[test]
    fn tokenize_empty_and_symbol_only() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("!!! --- ???").is_empty());
    }

    #[test]
    fn lexical_score_counts_occurrences() {
        let tokens = tokenize("cache ttl");
        let score = lexical_score(&tokens, "Cache policy: cache entries expire by TTL");
        assert_eq!(score, 3.0);
    }

    #[test]
    fn lexical_score_zero_on_miss() {
        let tokens = tokenize("kubernetes");
        assert_eq!(lexical_score(&tokens, "notes about gardening"), 0.0);
        assert_eq!(lexical_score(&[], "anything"), 0.0);
    }
}
