//! Question normalization: unicode cleanup and informal-token correction

use regex_lite::Regex;
use unicode_normalization::UnicodeNormalization;

/// Informal tokens corrected to their canonical form. The product audience
/// writes in French or English, so both shorthand sets are covered.
const SUBSTITUTIONS: [(&str, &str); 7] = [
    ("koi", "quoi"),
    ("pk", "pourquoi"),
    ("stp", "s'il te plaît"),
    ("svp", "s'il vous plaît"),
    ("ya", "il y a"),
    ("pls", "please"),
    ("u", "you"),
];

/// Deterministic, side-effect-free question cleaner.
///
/// Normalization is a fixed point: running it twice yields the same text.
pub struct QuestionNormalizer {
    rules: Vec<(Regex, &'static str)>,
}

impl QuestionNormalizer {
    pub fn new() -> Self {
        let rules = SUBSTITUTIONS
            .iter()
            .map(|(informal, canonical)| {
                // Word-boundary, case-insensitive match on the informal token
                let pattern = format!(r"(?i)\b{informal}\b");
                (
                    Regex::new(&pattern).expect("substitution pattern is valid"),
                    *canonical,
                )
            })
            .collect();

        Self { rules }
    }

    /// Clean raw user input: NFKC normalization, non-printable stripping,
    /// whitespace collapse, then informal-token substitution.
    pub fn normalize(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let composed: String = raw.nfkc().collect();

        let printable: String = composed.chars().filter(|ch| !ch.is_control()).collect();

        let mut text = printable.split_whitespace().collect::<Vec<_>>().join(" ");

        for (pattern, canonical) in &self.rules {
            text = pattern.replace_all(&text, *canonical).into_owned();
        }

        text
    }
}

impl Default for QuestionNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let normalizer = QuestionNormalizer::new();
        assert_eq!(normalizer.normalize(""), "");
    }

    #[test]
    fn test_whitespace_collapse_and_trim() {
        let normalizer = QuestionNormalizer::new();
        assert_eq!(
            normalizer.normalize("  what   about\t your  projects ?  "),
            "what about your projects ?"
        );
    }

    #[test]
    fn test_control_characters_stripped() {
        let normalizer = QuestionNormalizer::new();
        assert_eq!(
            normalizer.normalize("hello\u{0000}world\u{0007}"),
            "helloworld"
        );
    }

    #[test]
    fn test_nfkc_composition() {
        let normalizer = QuestionNormalizer::new();
        // Decomposed e + combining acute composes to é
        assert_eq!(normalizer.normalize("re\u{0301}alise\u{0301}"), "réalisé");
        // Compatibility forms fold to plain ASCII
        assert_eq!(normalizer.normalize("ﬁve"), "five");
    }

    #[test]
    fn test_slang_substitution_word_boundary() {
        let normalizer = QuestionNormalizer::new();
        assert_eq!(normalizer.normalize("c'est koi ça"), "c'est quoi ça");
        assert_eq!(normalizer.normalize("PK tu codes?"), "pourquoi tu codes?");
        // No substitution inside larger words
        assert_eq!(normalizer.normalize("sparkoise"), "sparkoise");
    }

    #[test]
    fn test_idempotent_on_normalized_text() {
        let normalizer = QuestionNormalizer::new();
        let inputs = [
            "Combien de projets as-tu réalisés?",
            "c koi   ton stack \u{00A0}préféré stp",
            "tell me about ur best project pls",
        ];
        for input in inputs {
            let once = normalizer.normalize(input);
            let twice = normalizer.normalize(&once);
            assert_eq!(once, twice);
        }
    }
}
