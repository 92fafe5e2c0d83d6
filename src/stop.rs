//! Stop-string matching on the tail of the generated text.

/// Checks whether generated bytes end with a configured stop string.
///
/// Stop strings are tested in configured order and the first match wins.
/// Empty stop strings are dropped at construction.
#[derive(Debug, Clone, Default)]
pub struct StopMatcher {
    stops: Vec<Vec<u8>>,
}

impl StopMatcher {
    pub fn new<I, S>(stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let stops = stops
            .into_iter()
            .map(|s| s.as_ref().as_bytes().to_vec())
            .filter(|s| !s.is_empty())
            .collect();
        Self { stops }
    }

    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Length of the stop suffix that `text` ends with, if any.
    pub fn matched_len(&self, text: &[u8]) -> Option<usize> {
        self.stops
            .iter()
            .find(|stop| text.ends_with(stop))
            .map(Vec::len)
    }

    /// Trim a matching stop suffix off `text`. Returns whether one matched.
    pub fn trim(&self, text: &mut Vec<u8>) -> bool {
        match self.matched_len(text) {
            Some(n) => {
                text.truncate(text.len() - n);
                true
            }
            None => false,
        }
    }
}
