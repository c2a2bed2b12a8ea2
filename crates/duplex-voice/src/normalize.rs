//! Vocabulary normalization applied to every transcript before it leaves the
//! capture layer.
//!
//! Corrections are pure text rewrites: spoken contractions and spelled-out
//! technical terms that recognizers reliably mangle. The rule set is ordered;
//! earlier rules see the raw text, later rules see prior rewrites.

use regex::Regex;
use tracing::debug;

/// One correction rule: case-insensitive word-boundary pattern → replacement.
struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

/// Pure transcript corrector. Construction compiles the rule set once; the
/// monitor shares a single instance for the whole session.
pub struct Normalizer {
    rules: Vec<Rule>,
}

const DEFAULT_RULES: &[(&str, &str)] = &[
    // Spoken contractions
    (r"\bwanna\b", "want to"),
    (r"\bgonna\b", "going to"),
    (r"\bgotta\b", "got to"),
    (r"\blemme\b", "let me"),
    (r"\bgimme\b", "give me"),
    (r"\bkinda\b", "kind of"),
    (r"\bsorta\b", "sort of"),
    // Technical terms recognizers spell out or split
    (r"\b(?:A P I|a p i|ay pee eye)\b", "API"),
    (r"\bblock ?chain\b", "blockchain"),
    (r"\bcrypto ?currency\b", "cryptocurrency"),
    (r"\b(?:A I|a i) services\b", "AI services"),
];

impl Normalizer {
    /// Build the default rule set.
    pub fn new() -> Self {
        Self::with_rules(DEFAULT_RULES)
    }

    /// Build from explicit `(pattern, replacement)` pairs. Patterns compile
    /// case-insensitively; an invalid pattern is skipped with a log rather
    /// than failing capture startup.
    pub fn with_rules(pairs: &[(&str, &'static str)]) -> Self {
        let rules = pairs
            .iter()
            .filter_map(|(pat, rep)| {
                match Regex::new(&format!("(?i){pat}")) {
                    Ok(pattern) => Some(Rule {
                        pattern,
                        replacement: rep,
                    }),
                    Err(e) => {
                        debug!("skipping invalid correction rule {:?}: {}", pat, e);
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// Apply all corrections. Pure: no state, no side effects beyond a debug
    /// log when something changed. Collapses runs of whitespace and trims.
    pub fn apply(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return String::new();
        }
        let mut out = text.to_string();
        for rule in &self.rules {
            out = rule.pattern.replace_all(&out, rule.replacement).into_owned();
        }
        let out = out.split_whitespace().collect::<Vec<_>>().join(" ");
        if out != text {
            debug!("corrected transcript: {:?} -> {:?}", text, out);
        }
        out
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrects_contractions() {
        let n = Normalizer::new();
        assert_eq!(n.apply("I wanna know"), "I want to know");
        assert_eq!(n.apply("Gonna call back"), "going to call back");
    }

    #[test]
    fn corrects_spelled_out_terms() {
        let n = Normalizer::new();
        assert_eq!(n.apply("the A P I docs"), "the API docs");
        assert_eq!(n.apply("block chain and crypto currency"), "blockchain and cryptocurrency");
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        let n = Normalizer::new();
        assert_eq!(n.apply("  tell  me   more "), "tell me more");
        assert_eq!(n.apply("   "), "");
    }

    #[test]
    fn is_pure() {
        let n = Normalizer::new();
        let first = n.apply("wanna");
        let second = n.apply("wanna");
        assert_eq!(first, second);
    }

    #[test]
    fn custom_rules_extend_the_table() {
        let n = Normalizer::with_rules(&[(r"\bacme corp\b", "AcmeCorp")]);
        assert_eq!(n.apply("calling Acme Corp today"), "calling AcmeCorp today");
    }
}
