//! Sampler stages and the candidate set they transform.
//!
//! A stage either narrows or reshapes the candidate set (penalties, top-k,
//! top-p, temperature) or makes the final decision (greedy, distribution
//! draw). Stages that track history get tokens through [`SamplerStage::accept`].

use crate::backend::Token;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};

/// Descending logit, ties broken by ascending id.
fn rank(a: &TokenData, b: &TokenData) -> Ordering {
    b.logit.total_cmp(&a.logit).then(a.id.cmp(&b.id))
}

/// One vocabulary entry under consideration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: Token,
    pub logit: f32,
    /// Probability after the most recent softmax. Stale once logits change.
    pub p: f32,
}

/// The candidate set for one sampling step.
#[derive(Debug, Clone)]
pub struct Candidates {
    data: Vec<TokenData>,
    /// Sorted by `rank`. Cleared whenever logits change.
    sorted: bool,
    selected: Option<usize>,
}

impl Candidates {
    /// One candidate per logit, in id order.
    pub fn from_logits(logits: &[f32]) -> Self {
        let data = logits
            .iter()
            .enumerate()
            .map(|(id, &logit)| TokenData {
                id: id as Token,
                logit,
                p: 0.0,
            })
            .collect();
        Self {
            data,
            sorted: false,
            selected: None,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    /// The token chosen by a deciding stage, if any.
    pub fn selected(&self) -> Option<Token> {
        self.selected.map(|i| self.data[i].id)
    }

    /// Highest-logit candidate; exact ties go to the lowest id.
    pub fn best(&self) -> Option<Token> {
        self.best_index().map(|i| self.data[i].id)
    }

    fn best_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, td) in self.data.iter().enumerate() {
            best = match best {
                None => Some(i),
                Some(b) => {
                    let cur = &self.data[b];
                    if td.logit > cur.logit || (td.logit == cur.logit && td.id < cur.id) {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        best
    }

    fn sort_desc(&mut self) {
        if !self.sorted {
            self.data.sort_unstable_by(rank);
            self.sorted = true;
        }
    }

    /// Keep the `k` best candidates, sorted. Partial selection first, so only
    /// the survivors pay for the sort.
    fn keep_top(&mut self, k: usize) {
        if k == 0 || k >= self.data.len() {
            self.sort_desc();
            return;
        }
        if !self.sorted {
            self.data.select_nth_unstable_by(k - 1, rank);
            self.data.truncate(k);
            self.data.sort_unstable_by(rank);
            self.sorted = true;
        } else {
            self.data.truncate(k);
        }
    }

    /// Mutable entry for `id`. Direct index while the set is still in id order.
    fn get_mut(&mut self, id: Token) -> Option<&mut TokenData> {
        let idx = id as usize;
        if !self.sorted && self.data.get(idx).map_or(false, |td| td.id == id) {
            return self.data.get_mut(idx);
        }
        self.data.iter_mut().find(|td| td.id == id)
    }

    /// Sort and fill `p` with the softmax of the current logits.
    fn softmax(&mut self) {
        self.sort_desc();
        let Some(max) = self.data.first().map(|td| td.logit) else {
            return;
        };
        let mut sum = 0.0f32;
        for td in &mut self.data {
            td.p = (td.logit - max).exp();
            sum += td.p;
        }
        for td in &mut self.data {
            td.p /= sum;
        }
    }

    fn truncate(&mut self, n: usize) {
        self.data.truncate(n);
    }
}

/// Repetition penalty over a bounded window of accepted tokens.
#[derive(Debug, Clone)]
pub struct Penalties {
    window: usize,
    repeat: f32,
    frequency: f32,
    presence: f32,
    recent: VecDeque<Token>,
    counts: HashMap<Token, usize>,
}

impl Penalties {
    pub fn new(window: usize, repeat: f32, frequency: f32, presence: f32) -> Self {
        Self {
            window,
            repeat,
            frequency,
            presence,
            recent: VecDeque::with_capacity(window),
            counts: HashMap::new(),
        }
    }

    /// Maximum number of tokens the penalty looks back over.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Tokens currently inside the window, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = Token> + '_ {
        self.recent.iter().copied()
    }

    fn is_neutral(&self) -> bool {
        self.window == 0 || (self.repeat == 1.0 && self.frequency == 0.0 && self.presence == 0.0)
    }

    fn accept(&mut self, token: Token) {
        if self.window == 0 {
            return;
        }
        if self.recent.len() == self.window {
            if let Some(old) = self.recent.pop_front() {
                if let Some(n) = self.counts.get_mut(&old) {
                    *n -= 1;
                    if *n == 0 {
                        self.counts.remove(&old);
                    }
                }
            }
        }
        self.recent.push_back(token);
        *self.counts.entry(token).or_insert(0) += 1;
    }

    fn apply(&self, c: &mut Candidates) {
        if self.is_neutral() || self.counts.is_empty() {
            return;
        }
        for (&id, &count) in &self.counts {
            let Some(td) = c.get_mut(id) else {
                continue;
            };
            if td.logit <= 0.0 {
                td.logit *= self.repeat;
            } else {
                td.logit /= self.repeat;
            }
            td.logit -= count as f32 * self.frequency + self.presence;
        }
        c.sorted = false;
    }
}

/// Seeded categorical draw over the surviving candidates.
#[derive(Debug, Clone)]
pub struct Dist {
    rng: StdRng,
}

impl Dist {
    pub fn new(seed: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(u64::from(seed)),
        }
    }

    fn apply(&mut self, c: &mut Candidates) {
        if c.is_empty() {
            return;
        }
        c.softmax();
        let pick = match WeightedIndex::new(c.data.iter().map(|td| td.p)) {
            Ok(weights) => weights.sample(&mut self.rng),
            // Degenerate distribution (all zero or NaN); fall back to the top.
            Err(_) => 0,
        };
        c.selected = Some(pick);
    }
}

/// One pluggable step of the sampler chain.
#[derive(Debug, Clone)]
pub enum SamplerStage {
    Penalties(Penalties),
    TopK { k: usize },
    TopP { p: f32, min_keep: usize },
    Temperature { temp: f32 },
    Greedy,
    Dist(Dist),
}

impl SamplerStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Penalties(_) => "penalties",
            Self::TopK { .. } => "top_k",
            Self::TopP { .. } => "top_p",
            Self::Temperature { .. } => "temperature",
            Self::Greedy => "greedy",
            Self::Dist(_) => "dist",
        }
    }

    /// Transform the candidate set, or select a token for deciding stages.
    pub fn apply(&mut self, c: &mut Candidates) {
        match self {
            Self::Penalties(pen) => pen.apply(c),
            Self::TopK { k } => c.keep_top((*k).max(1)),
            Self::TopP { p, min_keep } => {
                if *p >= 1.0 || c.is_empty() {
                    return;
                }
                c.softmax();
                let mut cum = 0.0f32;
                let mut keep = c.len();
                for (i, td) in c.data.iter().enumerate() {
                    cum += td.p;
                    if cum >= *p && i + 1 >= *min_keep {
                        keep = i + 1;
                        break;
                    }
                }
                c.truncate(keep.max(1));
            }
            Self::Temperature { temp } => {
                for td in &mut c.data {
                    td.logit /= *temp;
                }
            }
            Self::Greedy => c.selected = c.best_index(),
            Self::Dist(dist) => dist.apply(c),
        }
    }

    /// Observe the token chosen for this step. No-op for stateless stages.
    pub fn accept(&mut self, token: Token) {
        if let Self::Penalties(pen) = self {
            pen.accept(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(c: &Candidates) -> Vec<Token> {
        c.as_slice().iter().map(|td| td.id).collect()
    }

    #[test]
    fn top_k_keeps_highest() {
        let mut c = Candidates::from_logits(&[0.1, 3.0, 2.0, -1.0, 2.5]);
        SamplerStage::TopK { k: 2 }.apply(&mut c);
        assert_eq!(ids(&c), vec![1, 4]);
    }

    #[test]
    fn top_k_ties_keep_lowest_ids() {
        let mut c = Candidates::from_logits(&[1.0, 5.0, 5.0, 5.0]);
        SamplerStage::TopK { k: 2 }.apply(&mut c);
        assert_eq!(ids(&c), vec![1, 2]);
    }

    #[test]
    fn top_k_partial_selection_matches_full_sort() {
        let logits: Vec<f32> = (0..1000).map(|i| ((i * 37) % 101) as f32).collect();
        let mut c = Candidates::from_logits(&logits);
        SamplerStage::TopK { k: 25 }.apply(&mut c);

        let mut expected: Vec<(f32, Token)> =
            logits.iter().enumerate().map(|(i, &l)| (l, i as Token)).collect();
        expected.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        let expected: Vec<Token> = expected.iter().take(25).map(|&(_, id)| id).collect();
        assert_eq!(ids(&c), expected);
    }

    #[test]
    fn penalties_find_tokens_after_sorting() {
        let mut pen = SamplerStage::Penalties(Penalties::new(4, 2.0, 0.0, 0.0));
        pen.accept(2);
        let mut c = Candidates::from_logits(&[1.0, 3.0, 4.0]);
        SamplerStage::TopK { k: 3 }.apply(&mut c);
        pen.apply(&mut c);
        SamplerStage::Greedy.apply(&mut c);
        assert_eq!(c.selected(), Some(1));
    }

    #[test]
    fn top_k_larger_than_vocab_keeps_all() {
        let mut c = Candidates::from_logits(&[1.0, 2.0]);
        SamplerStage::TopK { k: 10 }.apply(&mut c);
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn top_p_keeps_smallest_covering_prefix() {
        // Probabilities roughly 0.665, 0.245, 0.090.
        let mut c = Candidates::from_logits(&[2.0, 1.0, 0.0]);
        SamplerStage::TopP { p: 0.8, min_keep: 1 }.apply(&mut c);
        assert_eq!(ids(&c), vec![0, 1]);
    }

    #[test]
    fn top_p_keeps_one_when_top_exceeds_threshold() {
        let mut c = Candidates::from_logits(&[10.0, 0.0, 0.0]);
        SamplerStage::TopP { p: 0.5, min_keep: 1 }.apply(&mut c);
        assert_eq!(ids(&c), vec![0]);
    }

    #[test]
    fn temperature_divides_logits() {
        let mut c = Candidates::from_logits(&[2.0, -4.0]);
        SamplerStage::Temperature { temp: 2.0 }.apply(&mut c);
        let logits: Vec<f32> = c.as_slice().iter().map(|td| td.logit).collect();
        assert_eq!(logits, vec![1.0, -2.0]);
    }

    #[test]
    fn greedy_breaks_ties_by_lowest_id() {
        let mut c = Candidates::from_logits(&[1.0, 7.0, 3.0, 7.0]);
        SamplerStage::Greedy.apply(&mut c);
        assert_eq!(c.selected(), Some(1));
    }

    #[test]
    fn greedy_after_sort_still_prefers_lowest_id() {
        let mut c = Candidates::from_logits(&[7.0, 1.0, 7.0]);
        SamplerStage::TopK { k: 3 }.apply(&mut c);
        SamplerStage::Greedy.apply(&mut c);
        assert_eq!(c.selected(), Some(0));
    }

    #[test]
    fn penalties_divide_positive_and_multiply_negative() {
        let mut stage = SamplerStage::Penalties(Penalties::new(8, 2.0, 0.0, 0.0));
        stage.accept(0);
        stage.accept(1);
        let mut c = Candidates::from_logits(&[4.0, -1.0, 3.0]);
        stage.apply(&mut c);
        let logits: Vec<f32> = c.as_slice().iter().map(|td| td.logit).collect();
        assert_eq!(logits, vec![2.0, -2.0, 3.0]);
    }

    #[test]
    fn penalties_forget_tokens_outside_window() {
        let mut pen = Penalties::new(2, 2.0, 0.0, 0.0);
        pen.accept(0);
        pen.accept(1);
        pen.accept(2);
        assert_eq!(pen.recent().collect::<Vec<_>>(), vec![1, 2]);

        let mut c = Candidates::from_logits(&[4.0, 4.0, 4.0]);
        pen.apply(&mut c);
        let logits: Vec<f32> = c.as_slice().iter().map(|td| td.logit).collect();
        assert_eq!(logits, vec![4.0, 2.0, 2.0]);
    }

    #[test]
    fn neutral_penalties_leave_logits_alone() {
        let mut pen = Penalties::new(64, 1.0, 0.0, 0.0);
        pen.accept(0);
        let mut c = Candidates::from_logits(&[4.0, 1.0]);
        pen.apply(&mut c);
        assert_eq!(c.as_slice()[0].logit, 4.0);
    }

    #[test]
    fn dist_only_draws_survivors() {
        let mut dist = SamplerStage::Dist(Dist::new(7));
        for _ in 0..50 {
            let mut c = Candidates::from_logits(&[0.0, 5.0, 5.0, 0.0]);
            SamplerStage::TopK { k: 2 }.apply(&mut c);
            dist.apply(&mut c);
            let t = c.selected().unwrap();
            assert!(t == 1 || t == 2, "drew {t}");
        }
    }

    #[test]
    fn dist_same_seed_same_draws() {
        let draws = |seed| {
            let mut dist = SamplerStage::Dist(Dist::new(seed));
            (0..20)
                .map(|_| {
                    let mut c = Candidates::from_logits(&[1.0; 8]);
                    dist.apply(&mut c);
                    c.selected().unwrap()
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(draws(3), draws(3));
    }

    proptest! {
        #[test]
        fn top_p_never_empties(
            logits in prop::collection::vec(-20.0f32..20.0, 1..64),
            p in 0.0001f32..0.9999,
        ) {
            let mut c = Candidates::from_logits(&logits);
            SamplerStage::TopP { p, min_keep: 1 }.apply(&mut c);
            prop_assert!(c.len() >= 1);
            prop_assert!(c.len() <= logits.len());
        }

        #[test]
        fn penalty_window_is_bounded(
            window in 0usize..32,
            tokens in prop::collection::vec(0u32..16, 0..128),
        ) {
            let mut pen = Penalties::new(window, 1.3, 0.0, 0.0);
            for t in &tokens {
                pen.accept(*t);
            }
            let recent: Vec<Token> = pen.recent().collect();
            prop_assert!(recent.len() <= window);
            let start = tokens.len().saturating_sub(window);
            prop_assert_eq!(recent.as_slice(), &tokens[start..]);
        }

        #[test]
        fn best_is_first_maximum(logits in prop::collection::vec(-4i32..4, 1..32)) {
            let logits: Vec<f32> = logits.into_iter().map(|x| x as f32).collect();
            let c = Candidates::from_logits(&logits);
            let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let first = logits.iter().position(|&x| x == max).unwrap() as Token;
            prop_assert_eq!(c.best(), Some(first));
        }
    }
}
