//! Entity extraction helpers: a regex extractor for proper-noun phrases and
//! the parser for `KEYWORDS:`-style model responses.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "did", "do", "does", "doing", "down", "during", "each", "few", "for", "from",
    "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him", "his", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most", "my", "no", "nor",
    "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "out", "over", "own",
    "same", "she", "should", "so", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "through", "to", "too", "under", "until",
    "up", "very", "was", "we", "were", "what", "when", "where", "which", "while", "who", "whom",
    "why", "will", "with", "you", "your",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

fn proper_noun_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[A-Z][\w&'.-]*(?:[ \t]+[A-Z][\w&'.-]*)*").expect("valid proper noun regex")
    })
}

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("valid word regex"))
}

/// Extract capitalized phrases ("SME LENDING", "Peter Berry") from free text.
///
/// Leading stopwords are stripped, so "Who" or "What Peter" at the start of a
/// question never become entities on their own.
pub fn extract_capitalized_entities(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    for m in proper_noun_regex().find_iter(text) {
        let words: Vec<&str> = m
            .as_str()
            .split_whitespace()
            .skip_while(|w| is_stopword(w))
            .collect();
        if words.is_empty() {
            continue;
        }
        let phrase = words.join(" ").trim_end_matches('.').to_string();
        if !phrase.is_empty() && seen.insert(phrase.to_lowercase()) {
            entities.push(phrase);
        }
    }

    entities
}

/// Parse a comma-separated model answer that follows `start_token`.
///
/// Multi-word items also contribute their non-stopword words, so
/// "Peter Berry" yields "Peter Berry", "Peter" and "Berry". Casing is kept.
pub fn parse_keywords_from_response(response: &str, start_token: &str) -> Vec<String> {
    let response = response.trim();
    let body = match response.find(start_token) {
        Some(pos) => {
            let rest = &response[pos + start_token.len()..];
            rest.lines().next().unwrap_or("")
        }
        None => response,
    };

    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    let mut push = |keyword: &str, keywords: &mut Vec<String>| {
        let keyword = keyword.trim().trim_matches(|c| c == '\'' || c == '"');
        if !keyword.is_empty() && seen.insert(keyword.to_string()) {
            keywords.push(keyword.to_string());
        }
    };

    for item in body.split(',') {
        push(item, &mut keywords);
        let sub_tokens: Vec<&str> = word_regex().find_iter(item).map(|m| m.as_str()).collect();
        if sub_tokens.len() > 1 {
            for token in sub_tokens.into_iter().filter(|t| !is_stopword(t)) {
                push(token, &mut keywords);
            }
        }
    }

    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_capitalized_basic() {
        let entities = extract_capitalized_entities("Who owns SME LENDING?");
        assert_eq!(entities, vec!["SME LENDING"]);
    }

    #[test]
    fn test_extract_capitalized_multiple_and_dedup() {
        let entities = extract_capitalized_entities(
            "Is Peter Berry a shareholder of SME LENDING, and does peter berry or Peter Berry own Acme?",
        );
        assert_eq!(entities, vec!["Peter Berry", "SME LENDING", "Acme"]);
    }

    #[test]
    fn test_extract_capitalized_no_matches() {
        assert!(extract_capitalized_entities("no proper nouns here").is_empty());
        assert!(extract_capitalized_entities("What").is_empty());
    }

    #[test]
    fn test_parse_keywords_with_token() {
        let keywords = parse_keywords_from_response("KEYWORDS: SME LENDING, Peter Berry", "KEYWORDS:");
        assert_eq!(keywords, vec!["SME LENDING", "SME", "LENDING", "Peter Berry", "Peter", "Berry"]);
    }

    #[test]
    fn test_parse_keywords_with_preamble_and_stopwords() {
        let response = "Sure, here you go.\nSYNONYMS: Bank of America, BofA\nThanks";
        let keywords = parse_keywords_from_response(response, "SYNONYMS:");
        assert_eq!(keywords, vec!["Bank of America", "Bank", "America", "BofA"]);
    }

    #[test]
    fn test_parse_keywords_without_token_and_empty_items() {
        let keywords = parse_keywords_from_response("acme, , 'beta'", "KEYWORDS:");
        assert_eq!(keywords, vec!["acme", "beta"]);
        assert!(parse_keywords_from_response("KEYWORDS:", "KEYWORDS:").is_empty());
    }
}
