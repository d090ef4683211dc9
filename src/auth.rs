//! Caller token check. Every operation asks for a yes/no answer before it
//! touches the store.

use std::collections::BTreeSet;

pub trait TokenValidator: Send + Sync {
    fn is_valid(&self, token: &str) -> bool;
}

/// Accepts any token that is not empty or whitespace.
#[derive(Debug, Default, Clone, Copy)]
pub struct NonBlankToken;

impl TokenValidator for NonBlankToken {
    fn is_valid(&self, token: &str) -> bool {
        !token.trim().is_empty()
    }
}

/// Accepts only tokens from a fixed set.
#[derive(Debug, Default, Clone)]
pub struct StaticTokens {
    allowed: BTreeSet<String>,
}

impl StaticTokens {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

impl TokenValidator for StaticTokens {
    fn is_valid(&self, token: &str) -> bool {
        self.allowed.contains(token)
    }
}

impl<F> TokenValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, token: &str) -> bool {
        self(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_tokens_are_rejected() {
        assert!(NonBlankToken.is_valid("abc"));
        assert!(!NonBlankToken.is_valid(""));
        assert!(!NonBlankToken.is_valid(" \t"));
    }

    #[test]
    fn static_tokens_match_exactly() {
        let tokens = StaticTokens::new(["alpha", "beta"]);
        assert!(tokens.is_valid("beta"));
        assert!(!tokens.is_valid("gamma"));
        assert!(!tokens.is_valid("alpha "));
    }

    #[test]
    fn closures_are_validators() {
        let only_admin = |t: &str| t == "admin";
        assert!(only_admin.is_valid("admin"));
        assert!(!only_admin.is_valid("guest"));
    }
}
