//! Token history for one generation call.

use crate::backend::Token;

/// Ordered token ids: the prompt batch followed by every accepted token.
///
/// Append-only. Owned by a single decode loop for the duration of one call.
#[derive(Debug, Clone, Default)]
pub struct TokenHistory {
    tokens: Vec<Token>,
    n_prompt: usize,
}

impl TokenHistory {
    /// Start a history from the prompt tokens.
    pub fn with_prompt(prompt: Vec<Token>) -> Self {
        let n_prompt = prompt.len();
        Self {
            tokens: prompt,
            n_prompt,
        }
    }

    /// Append one accepted token.
    pub fn push(&mut self, token: Token) {
        self.tokens.push(token);
    }

    /// Tokens produced after the prompt.
    pub fn generated(&self) -> &[Token] {
        &self.tokens[self.n_prompt..]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Consume the history, returning only the generated tokens.
    pub fn into_generated(mut self) -> Vec<Token> {
        self.tokens.split_off(self.n_prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_and_generated_are_split() {
        let mut h = TokenHistory::with_prompt(vec![1, 2, 3]);
        h.push(10);
        h.push(11);
        assert_eq!(h.generated(), &[10, 11]);
        assert_eq!(h.len(), 5);
        assert_eq!(h.into_generated(), vec![10, 11]);
    }

    #[test]
    fn empty_prompt() {
        let mut h = TokenHistory::with_prompt(Vec::new());
        assert!(h.is_empty());
        assert!(h.generated().is_empty());
        h.push(4);
        assert_eq!(h.generated(), &[4]);
    }
}
