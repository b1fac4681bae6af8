//! Name inclusion patterns shared by extraction and filtering

use crate::error::Result;
use regex::Regex;

/// Regex matched against the start of a record name
///
/// Records without a name (or with an empty one) are never excluded. `None` includes everything.
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Option<Regex>,
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            regex: Some(Regex::new(&format!("^(?:{pattern})"))?),
        })
    }

    /// Pattern matching every name (`.*`)
    pub fn include_all() -> Self {
        Self { regex: None }
    }

    /// Build from an optional configured pattern, defaulting to include-all
    pub fn from_option(pattern: Option<&str>) -> Result<Self> {
        pattern.map_or_else(|| Ok(Self::include_all()), Self::new)
    }

    pub fn matches(&self, name: Option<&str>) -> bool {
        match (&self.regex, name) {
            (Some(regex), Some(name)) if !name.is_empty() => regex.is_match(name),
            _ => true,
        }
    }
}

impl Default for NamePattern {
    fn default() -> Self {
        Self::include_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_is_anchored_at_start() {
        let pattern = NamePattern::new("prod").unwrap();
        assert!(pattern.matches(Some("prod-network")));
        assert!(!pattern.matches(Some("staging-prod")));
    }

    #[test]
    fn test_unnamed_records_are_never_excluded() {
        let pattern = NamePattern::new("^nothing-matches$").unwrap();
        assert!(!pattern.matches(Some("network")));
        assert!(pattern.matches(None));
        assert!(pattern.matches(Some("")));
    }

    #[test]
    fn test_alternation_is_grouped() {
        let pattern = NamePattern::new("a|b").unwrap();
        assert!(pattern.matches(Some("beta")));
        assert!(!pattern.matches(Some("gamma")));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(NamePattern::new("(").is_err());
        assert!(NamePattern::from_option(None).unwrap().matches(Some("anything")));
    }
}
