use regex::Regex;

/// Keyword admission policy: a message qualifies when any pattern matches.
///
/// Patterns are compiled case-insensitive when the configuration is loaded.
#[derive(Debug, Clone, Default)]
pub struct TriggerFilter {
    patterns: Vec<Regex>,
}

impl TriggerFilter {
    pub fn new(patterns: Vec<Regex>) -> Self {
        Self { patterns }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::RegexBuilder;

    fn filter(patterns: &[&str]) -> TriggerFilter {
        TriggerFilter::new(
            patterns
                .iter()
                .map(|p| RegexBuilder::new(p).case_insensitive(true).build().unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_matches_any_keyword_case_insensitively() {
        let f = filter(&["q.*post", "outside"]);
        assert!(f.matches("Hi sir QPost delivery"));
        assert!(f.matches("I am OUTSIDE"));
        assert!(!f.matches("hello there"));
    }

    #[test]
    fn test_patterns_are_regular_expressions() {
        let f = filter(&[r"^\d{4}$"]);
        assert!(f.matches("1234"));
        assert!(!f.matches("code 1234"));
    }

    #[test]
    fn test_empty_filter_never_matches() {
        let f = TriggerFilter::default();
        assert!(f.is_empty());
        assert!(!f.matches("anything"));
    }
}
