use regex::Regex;

/// Matches configured goodbye phrases as whole words, case-insensitively.
#[derive(Debug, Clone)]
pub struct GoodbyeDetector {
    pattern: Option<Regex>,
}

impl GoodbyeDetector {
    pub fn new<S: AsRef<str>>(phrases: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = phrases
            .iter()
            .map(|p| p.as_ref().trim())
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|p| p.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_GOODBYE_PHRASES;

    #[test]
    fn test_default_phrases() {
        let detector = GoodbyeDetector::new(DEFAULT_GOODBYE_PHRASES).unwrap();
        assert!(detector.matches("OK, thanks. Bye!"));
        assert!(detector.matches("Goodbye"));
        assert!(detector.matches("have a  nice day"));
        assert!(detector.matches("תודה, להתראות"));
        assert!(!detector.matches("the byelaw applies"));
        assert!(!detector.matches("hello there"));
    }

    #[test]
    fn test_empty_phrase_list_never_matches() {
        let detector = GoodbyeDetector::new::<&str>(&[]).unwrap();
        assert!(!detector.matches("bye"));
    }
}
