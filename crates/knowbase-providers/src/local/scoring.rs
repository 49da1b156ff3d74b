//! Keyword/fuzzy scoring for the local provider.
//!
//! Score bands (downstream confidence checks and match badges key off these):
//!
//! | condition                                              | score |
//! |--------------------------------------------------------|-------|
//! | query equals question or answer (trimmed, any case)    | 100   |
//! | every significant query word found                     | 90    |
//! | coverage (+ consecutive bonus) > 75%                   | 70    |
//! | > 50%                                                  | 50    |
//! | > 25%                                                  | 30    |
//! | at least one word found                                | 20    |
//! | nothing found                                          | excluded |

use knowbase_core::types::{rank_results, KnowledgeEntry, SearchResult};

pub const EXACT_MATCH_SCORE: u8 = 100;
pub const ALL_WORDS_SCORE: u8 = 90;
/// Added to the coverage percentage per adjacent in-order query word pair.
pub const CONSECUTIVE_BONUS: f64 = 15.0;
/// Tokens shorter than this never count as significant.
pub const MIN_WORD_LEN: usize = 3;

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "may", "me", "might", "my", "no", "not",
    "of", "on", "or", "our", "should", "so", "some", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "too", "very", "was", "we", "were",
    "what", "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

/// Lowercased alphanumeric tokens, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Query tokens that carry meaning: long enough and not a stop-word.
pub fn significant_words(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|w| w.chars().count() >= MIN_WORD_LEN && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// True when `a` and `b` differ by at most one insertion, deletion or substitution.
pub fn within_one_edit(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if long.len() - short.len() > 1 {
        return false;
    }

    let (mut i, mut j, mut edits) = (0, 0, 0);
    while i < short.len() && j < long.len() {
        if short[i] == long[j] {
            i += 1;
            j += 1;
            continue;
        }
        edits += 1;
        if edits > 1 {
            return false;
        }
        if short.len() == long.len() {
            i += 1;
        }
        j += 1;
    }
    edits + (long.len() - j) + (short.len() - i) <= 1
}

/// Outcome of scoring one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMatch {
    pub score: u8,
    /// Significant query words that were found.
    pub matched: Vec<String>,
}

/// Precomputed query, reused across every stored entry.
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    normalized: String,
    words: Vec<String>,
}

impl QueryMatcher {
    pub fn new(query: &str) -> Self {
        Self {
            normalized: query.trim().to_lowercase(),
            words: significant_words(query),
        }
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Score an entry, or `None` when it should be excluded.
    pub fn score(&self, entry: &KnowledgeEntry) -> Option<EntryMatch> {
        if !self.normalized.is_empty()
            && (entry.question.trim().to_lowercase() == self.normalized
                || entry.answer.trim().to_lowercase() == self.normalized)
        {
            return Some(EntryMatch {
                score: EXACT_MATCH_SCORE,
                matched: self.words.clone(),
            });
        }
        if self.words.is_empty() {
            return None;
        }

        let tokens = tokenize(&entry.searchable_text());
        let flat = tokens.join(" ");
        let matched: Vec<String> = self
            .words
            .iter()
            .filter(|w| flat.contains(w.as_str()) || tokens.iter().any(|t| within_one_edit(w, t)))
            .cloned()
            .collect();

        if matched.is_empty() {
            return None;
        }
        if matched.len() == self.words.len() {
            return Some(EntryMatch { score: ALL_WORDS_SCORE, matched });
        }

        let consecutive = self
            .words
            .windows(2)
            .filter(|pair| flat.contains(&format!("{} {}", pair[0], pair[1])))
            .count();
        let coverage = matched.len() as f64 / self.words.len() as f64 * 100.0;
        let pct = (coverage + CONSECUTIVE_BONUS * consecutive as f64).min(100.0);

        let score = if pct > 75.0 {
            70
        } else if pct > 50.0 {
            50
        } else if pct > 25.0 {
            30
        } else {
            20
        };
        Some(EntryMatch { score, matched })
    }
}

/// Score and rank entries. Ties keep storage order.
pub fn rank_entries(query: &str, entries: Vec<KnowledgeEntry>) -> Vec<SearchResult> {
    let matcher = QueryMatcher::new(query);
    let mut results: Vec<SearchResult> = entries
        .into_iter()
        .filter_map(|entry| {
            matcher
                .score(&entry)
                .map(|m| SearchResult::new(entry, m.score, m.matched))
        })
        .collect();
    rank_results(&mut results);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, question: &str, answer: &str) -> KnowledgeEntry {
        KnowledgeEntry::new(question, answer).with_id(id)
    }

    fn score(query: &str, e: &KnowledgeEntry) -> Option<u8> {
        QueryMatcher::new(query).score(e).map(|m| m.score)
    }

    #[test]
    fn test_significant_words_drop_stop_words_and_short_tokens() {
        assert_eq!(
            significant_words("How do I reset my password, ok?"),
            vec!["reset", "password"]
        );
        assert!(significant_words("is it on?").is_empty());
    }

    #[test]
    fn test_within_one_edit() {
        assert!(within_one_edit("password", "password"));
        assert!(within_one_edit("pasword", "password"));
        assert!(within_one_edit("passwords", "password"));
        assert!(within_one_edit("passwerd", "password"));
        assert!(!within_one_edit("pswd", "password"));
        assert!(!within_one_edit("reset", "rests"));
    }

    #[test]
    fn test_exact_question_match_any_case() {
        let e = entry("1", "How do I reset my password?", "Go to settings > security > reset.");
        assert_eq!(score("  HOW DO I RESET MY PASSWORD?  ", &e), Some(100));
        assert_eq!(score("go to settings > security > reset.", &e), Some(100));
    }

    #[test]
    fn test_all_words_found_scores_90() {
        let e = entry("1", "How do I reset my password?", "Go to settings > security > reset.")
            .with_keywords(["account"]);
        assert_eq!(score("reset password", &e), Some(90));
        assert_eq!(score("account security", &e), Some(90));
    }

    #[test]
    fn test_fuzzy_token_counts_as_match() {
        let e = entry("1", "How do I reset my password?", "Settings page.");
        assert_eq!(score("pasword reset", &e), Some(90));
    }

    #[test]
    fn test_partial_coverage_buckets() {
        let e = entry("1", "Invoice download", "Billing portal lists every invoice.");
        // 1 of 4 words: 25% is not above 25 → 20
        assert_eq!(score("invoice refund shipping warranty", &e), Some(20));
        // 2 of 4 words, not adjacent in the query: 50% → 30
        assert_eq!(score("invoice refund billing warranty", &e), Some(30));
        // 3 of 4 words plus the adjacent pair "billing portal": 90% → 70
        assert_eq!(score("invoice billing portal warranty", &e), Some(70));
        // 3 of 4 words without an adjacent pair: 75% is not above 75 → 50
        assert_eq!(score("invoice portal billing warranty", &e), Some(50));
    }

    #[test]
    fn test_consecutive_bonus_lifts_bucket() {
        let e = entry("1", "Billing portal access", "Use the billing portal.");
        // 2 of 3 words → 66%, plus one adjacent pair "billing portal" → 81% → 70
        assert_eq!(score("billing portal refund", &e), Some(70));
        // same coverage, reversed order, no adjacent pair → 50
        assert_eq!(score("portal billing refund", &e), Some(50));
    }

    #[test]
    fn test_no_significant_match_excluded() {
        let e = entry("1", "Office hours", "We open at nine.");
        assert_eq!(score("reset password", &e), None);
        assert_eq!(score("the and of", &e), None);
        assert_eq!(score("", &e), None);
    }

    #[test]
    fn test_reset_password_scenario_ranking() {
        let unrelated = entry("2", "Where is the office?", "Reception handles visitor passes.");
        let weak = entry("3", "Password policy", "Minimum twelve characters.");
        let target = entry("1", "How do I reset my password?", "Go to settings > security > reset.");

        let ranked = rank_entries("reset password", vec![unrelated, weak, target]);
        let ids: Vec<_> = ranked.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(ids, ["1", "3"]);
        assert!(ranked[0].score >= 70);
        assert_eq!(ranked[1].score, 30);
    }

    #[test]
    fn test_weak_single_word_match_ranks_last() {
        let weak = entry("3", "Password policy", "Minimum twelve characters.");
        let partial = entry("2", "Account recovery", "Reset via email.");
        let unrelated = entry("4", "Where is the office?", "Reception handles visitor passes.");
        let target = entry("1", "How do I reset my account password?", "We email a reset link.");

        let ranked = rank_entries("reset account password email", vec![weak, partial, unrelated, target]);
        let scored: Vec<_> = ranked.iter().map(|r| (r.entry.id.as_str(), r.score)).collect();
        // 1 of 4 words is 25%, not above 25 → 20
        assert_eq!(scored, [("1", 90u8), ("2", 50u8), ("3", 20u8)]);
    }

    #[test]
    fn test_ties_keep_storage_order() {
        let entries = vec![
            entry("a", "Shipping times", "Orders ship daily."),
            entry("b", "Shipping costs", "Free over fifty."),
            entry("c", "Shipping regions", "Domestic only."),
        ];
        let ranked = rank_entries("shipping", entries);
        let ids: Vec<_> = ranked.iter().map(|r| r.entry.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
        assert!(ranked.iter().all(|r| r.score == 90));
    }

    #[test]
    fn test_highlights_are_matched_words() {
        let e = entry("1", "Reset password", "Settings.");
        let m = QueryMatcher::new("reset billing").score(&e).unwrap();
        assert_eq!(m.matched, vec!["reset"]);
    }
}
