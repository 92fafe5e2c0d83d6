//! Deterministic in-memory backend.
//!
//! Stands in for a real model wherever the decode loop needs to be driven
//! without weights: unit and integration tests, and the `scripted` demo.
//! It honors the whole [`InferenceBackend`] contract, including the
//! undersized-buffer signals, so the retry paths can be exercised.
//!
//! - tokenizer: one token per prompt byte (`byte % vocab_size`), optional BOS
//! - fragments: bytes for ids below 256, `<id>` above, or an explicit table
//! - logits: a caller-supplied function of the evaluated context

use super::{BackendError, InferenceBackend, Token};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};

type LogitsFn = Box<dyn FnMut(&[Token]) -> Vec<f32> + Send>;

/// Default context window of the scripted model.
pub const DEFAULT_CONTEXT: usize = 512;

pub struct ScriptedBackend {
    n_vocab: usize,
    n_ctx: usize,
    bos: Option<Token>,
    eog: HashSet<Token>,
    pieces: HashMap<Token, Vec<u8>>,
    unrenderable: HashSet<Token>,
    expansion: usize,
    logits_fn: LogitsFn,
    fail_on_eval: Option<usize>,
    context: Vec<Token>,
    batches: Vec<Vec<Token>>,
    logits: Option<Vec<f32>>,
    tokenize_calls: Cell<usize>,
}

impl ScriptedBackend {
    /// A model over `n_vocab` tokens whose logits are all zero.
    pub fn new(n_vocab: usize) -> Self {
        Self {
            n_vocab,
            n_ctx: DEFAULT_CONTEXT,
            bos: None,
            eog: HashSet::new(),
            pieces: HashMap::new(),
            unrenderable: HashSet::new(),
            expansion: 1,
            logits_fn: Box::new(move |_| vec![0.0; n_vocab]),
            fail_on_eval: None,
            context: Vec::new(),
            batches: Vec::new(),
            logits: None,
            tokenize_calls: Cell::new(0),
        }
    }

    /// Compute logits from the evaluated context (prompt included).
    pub fn with_logits<F>(mut self, f: F) -> Self
    where
        F: FnMut(&[Token]) -> Vec<f32> + Send + 'static,
    {
        self.logits_fn = Box::new(f);
        self
    }

    /// Every forward pass puts the highest logit on `token`.
    pub fn always_prefer(self, token: Token) -> Self {
        let n_vocab = self.n_vocab;
        self.with_logits(move |_| one_hot(n_vocab, token))
    }

    /// The i-th logit request prefers `script[i]`; the last entry repeats.
    pub fn with_script(self, script: Vec<Token>) -> Self {
        let n_vocab = self.n_vocab;
        let mut step = 0usize;
        self.with_logits(move |_| {
            let token = script
                .get(step)
                .or_else(|| script.last())
                .copied()
                .unwrap_or(0);
            step += 1;
            one_hot(n_vocab, token)
        })
    }

    pub fn with_context_size(mut self, n_ctx: usize) -> Self {
        self.n_ctx = n_ctx;
        self
    }

    /// Prepend `token` when tokenizing with `add_special`.
    pub fn with_bos(mut self, token: Token) -> Self {
        self.bos = Some(token);
        self
    }

    pub fn with_eog(mut self, token: Token) -> Self {
        self.eog.insert(token);
        self
    }

    pub fn with_piece(mut self, token: Token, text: &str) -> Self {
        self.pieces.insert(token, text.as_bytes().to_vec());
        self
    }

    /// `token` always reports an undersized buffer, however large.
    pub fn with_unrenderable(mut self, token: Token) -> Self {
        self.unrenderable.insert(token);
        self
    }

    /// Emit `n` tokens per prompt byte.
    pub fn with_token_expansion(mut self, n: usize) -> Self {
        self.expansion = n.max(1);
        self
    }

    /// Fail the evaluation call with this zero-based index.
    pub fn fail_on_eval(mut self, call: usize) -> Self {
        self.fail_on_eval = Some(call);
        self
    }

    /// Number of evaluation calls made, failed ones included.
    pub fn eval_calls(&self) -> usize {
        self.batches.len()
    }

    /// The token batches passed to each evaluation call.
    pub fn eval_batches(&self) -> &[Vec<Token>] {
        &self.batches
    }

    /// Every token evaluated so far, in position order.
    pub fn context(&self) -> &[Token] {
        &self.context
    }

    pub fn tokenize_calls(&self) -> usize {
        self.tokenize_calls.get()
    }

    fn default_piece(token: Token) -> Vec<u8> {
        match u8::try_from(token) {
            Ok(byte) => vec![byte],
            Err(_) => format!("<{token}>").into_bytes(),
        }
    }
}

fn one_hot(n_vocab: usize, token: Token) -> Vec<f32> {
    let mut logits = vec![0.0; n_vocab];
    if let Some(slot) = logits.get_mut(token as usize) {
        *slot = 10.0;
    }
    logits
}

impl InferenceBackend for ScriptedBackend {
    fn vocab_size(&self) -> usize {
        self.n_vocab
    }

    fn context_size(&self) -> usize {
        self.n_ctx
    }

    fn tokenize(
        &self,
        text: &str,
        add_special: bool,
        capacity: usize,
    ) -> Result<Vec<Token>, BackendError> {
        self.tokenize_calls.set(self.tokenize_calls.get() + 1);
        if self.n_vocab == 0 {
            return Err(BackendError::TokenizerError("empty vocabulary".to_string()));
        }
        let mut tokens = Vec::with_capacity(text.len() * self.expansion + 1);
        if add_special {
            tokens.extend(self.bos);
        }
        for byte in text.bytes() {
            let token = Token::from(byte) % self.n_vocab as Token;
            tokens.extend(std::iter::repeat(token).take(self.expansion));
        }
        if tokens.len() > capacity {
            return Err(BackendError::BufferTooSmall {
                required: tokens.len(),
            });
        }
        Ok(tokens)
    }

    fn detokenize(&self, token: Token, capacity: usize) -> Result<Vec<u8>, BackendError> {
        if token as usize >= self.n_vocab {
            return Err(BackendError::TokenizerError(format!("token {token} out of range")));
        }
        if self.unrenderable.contains(&token) {
            return Err(BackendError::BufferTooSmall {
                required: capacity.saturating_mul(2).saturating_add(1),
            });
        }
        let bytes = self
            .pieces
            .get(&token)
            .cloned()
            .unwrap_or_else(|| Self::default_piece(token));
        if bytes.len() > capacity {
            return Err(BackendError::BufferTooSmall {
                required: bytes.len(),
            });
        }
        Ok(bytes)
    }

    fn evaluate(&mut self, tokens: &[Token], logits_for: &[usize]) -> Result<(), BackendError> {
        let call = self.batches.len();
        self.batches.push(tokens.to_vec());
        self.logits = None;

        if self.fail_on_eval == Some(call) || tokens.is_empty() {
            return Err(BackendError::InferenceError { status: -1 });
        }
        if tokens.iter().any(|&t| t as usize >= self.n_vocab) {
            return Err(BackendError::InferenceError { status: -1 });
        }
        if self.context.len() + tokens.len() > self.n_ctx {
            return Err(BackendError::ContextFull);
        }

        let start = self.context.len();
        self.context.extend_from_slice(tokens);

        if let Some(&last) = logits_for.iter().filter(|&&i| i < tokens.len()).max() {
            let mut logits = (self.logits_fn)(&self.context[..start + last + 1]);
            logits.resize(self.n_vocab, f32::NEG_INFINITY);
            self.logits = Some(logits);
        }
        Ok(())
    }

    fn last_logits(&self) -> Option<&[f32]> {
        self.logits.as_deref()
    }

    fn is_end_of_generation(&self, token: Token) -> bool {
        self.eog.contains(&token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logits_only_when_requested() {
        let mut b = ScriptedBackend::new(4).always_prefer(2);
        b.evaluate(&[0, 1], &[]).unwrap();
        assert!(b.last_logits().is_none());
        b.evaluate(&[3], &[0]).unwrap();
        assert_eq!(b.last_logits().unwrap()[2], 10.0);
        assert_eq!(b.context(), &[0, 1, 3]);
        assert_eq!(b.eval_calls(), 2);
    }

    #[test]
    fn logits_fn_sees_context_up_to_requested_position() {
        let mut b = ScriptedBackend::new(8).with_logits(|ctx| {
            let mut l = vec![0.0; 8];
            l[ctx.len()] = 1.0;
            l
        });
        b.evaluate(&[1, 1, 1], &[0]).unwrap();
        assert_eq!(crate::sampling::argmax(b.last_logits().unwrap()), Some(1));
    }

    #[test]
    fn context_overflow_is_reported() {
        let mut b = ScriptedBackend::new(4).with_context_size(2);
        b.evaluate(&[0, 1], &[1]).unwrap();
        assert!(matches!(b.evaluate(&[2], &[0]), Err(BackendError::ContextFull)));
    }

    #[test]
    fn scripted_failure_and_empty_batch() {
        let mut b = ScriptedBackend::new(4).fail_on_eval(1);
        b.evaluate(&[0], &[0]).unwrap();
        assert!(matches!(
            b.evaluate(&[1], &[0]),
            Err(BackendError::InferenceError { status: -1 })
        ));
        assert!(b.evaluate(&[], &[]).is_err());
    }

    #[test]
    fn tokenizer_reports_required_length() {
        let b = ScriptedBackend::new(256).with_bos(1);
        match b.tokenize("abcd", true, 2) {
            Err(BackendError::BufferTooSmall { required }) => assert_eq!(required, 5),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(b.tokenize("ab", true, 8).unwrap(), vec![1, 97, 98]);
        assert_eq!(b.tokenize("ab", false, 8).unwrap(), vec![97, 98]);
    }

    #[test]
    fn default_and_explicit_pieces() {
        let b = ScriptedBackend::new(1024).with_piece(300, "hello");
        assert_eq!(b.detokenize(b'z' as Token, 16).unwrap(), b"z");
        assert_eq!(b.detokenize(300, 16).unwrap(), b"hello");
        assert_eq!(b.detokenize(301, 16).unwrap(), b"<301>");
        assert!(b.detokenize(5000, 16).is_err());
    }
}
