use anyhow::Result;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Token estimator for streamed content fragments.
///
/// The provider only reports token usage in an optional trailing record, and
/// that count includes reasoning-phase tokens. Answer-token statistics are
/// therefore derived from the fragments themselves. GLM tokenization is not
/// public, so cl100k is used as a stable approximation.
pub struct Tokenizer {
    encoder: CoreBPE,
}

impl Tokenizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            encoder: cl100k_base()?,
        })
    }

    pub fn count_tokens(&self, text: &str) -> usize {
        self.encoder.encode_with_special_tokens(text).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_counting() {
        let tokenizer = Tokenizer::new().unwrap();

        let count = tokenizer.count_tokens("Hello, world!");
        assert!(count > 0);

        // Longer text yields more tokens.
        let short = tokenizer.count_tokens("one");
        let long = tokenizer.count_tokens("one two three four five six");
        assert!(long > short);
    }

    #[test]
    fn test_empty_text() {
        let tokenizer = Tokenizer::new().unwrap();
        assert_eq!(tokenizer.count_tokens(""), 0);
    }
}
