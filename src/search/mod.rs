/// Case-insensitive substring query over message content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    needle: String,
}

impl SearchQuery {
    pub fn new(input: &str) -> Self {
        Self {
            needle: input.trim().to_lowercase(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.needle.is_empty()
    }

    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// An empty query matches nothing.
    pub fn matches(&self, content: &str) -> bool {
        !self.is_empty() && content.to_lowercase().contains(&self.needle)
    }

    pub fn highlight_terms(&self) -> Vec<String> {
        if self.is_empty() {
            Vec::new()
        } else {
            vec![self.needle.clone()]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_lowercases_input() {
        let query = SearchQuery::new("  Hi There ");
        assert_eq!(query.needle(), "hi there");
        assert!(query.matches("oh HI THERE friend"));
        assert!(!query.matches("hi, there"));
    }

    #[test]
    fn blank_query_matches_nothing() {
        for input in ["", "   ", "\t\n"] {
            let query = SearchQuery::new(input);
            assert!(query.is_empty());
            assert!(!query.matches("anything"));
            assert!(query.highlight_terms().is_empty());
        }
    }

    #[test]
    fn matches_tags_as_plain_text() {
        let query = SearchQuery::new("#ToDo");
        assert!(query.matches("remember #todo later"));
        assert_eq!(query.highlight_terms(), vec!["#todo".to_string()]);
    }
}
