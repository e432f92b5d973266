//! Which domain events leave the process through the outbox.

use std::collections::BTreeSet;

/// Static selection of event types copied to the outbox at commit.
///
/// Events not selected are still delivered to in-process handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PropagationConfig {
    /// Nothing is propagated.
    #[default]
    None,
    /// Every event is propagated.
    All,
    /// Only the listed event types are propagated.
    Only(BTreeSet<String>),
}

impl PropagationConfig {
    pub fn only<I, S>(event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(event_types.into_iter().map(Into::into).collect())
    }

    /// Parses `"*"`, an empty string, or a comma-separated list of event types.
    pub fn parse(list: &str) -> Self {
        let trimmed = list.trim();
        if trimmed == "*" {
            return Self::All;
        }
        let types: BTreeSet<String> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if types.is_empty() {
            Self::None
        } else {
            Self::Only(types)
        }
    }

    pub fn propagates(&self, event_type: &str) -> bool {
        match self {
            Self::None => false,
            Self::All => true,
            Self::Only(types) => types.contains(event_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_selects_listed_types() {
        let config = PropagationConfig::only(["FundsDeposited", "AccountClosed"]);

        assert!(config.propagates("FundsDeposited"));
        assert!(config.propagates("AccountClosed"));
        assert!(!config.propagates("AccountFrozen"));
    }

    #[test]
    fn none_and_all() {
        assert!(!PropagationConfig::None.propagates("Anything"));
        assert!(PropagationConfig::All.propagates("Anything"));
        assert_eq!(PropagationConfig::default(), PropagationConfig::None);
    }

    #[test]
    fn parse_forms() {
        assert_eq!(PropagationConfig::parse("*"), PropagationConfig::All);
        assert_eq!(PropagationConfig::parse("  "), PropagationConfig::None);
        assert_eq!(
            PropagationConfig::parse("A, B,,"),
            PropagationConfig::only(["A", "B"])
        );
    }
}
