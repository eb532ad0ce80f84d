//! Navigation over the matching pairs of a collection.
//!
//! Unordered pairs `(i, j)` with `i < j < n` are laid out in triangular order,
//! by `i` then `j`. Every position is a linear index into that order, and all
//! conversions go through [`pair_index`] and [`index_to_pair`].

use crate::core::policy::{MatchThresholds, MatchVerdict, matches};
use crate::core::video::VideoRecord;
use std::path::Path;

/// Number of unordered pairs among `n` items.
pub fn pair_count(n: usize) -> usize {
    n * n.saturating_sub(1) / 2
}

/// Comparisons done up to and including `(i, j)`, counting from 1.
pub fn comparisons_so_far(n: usize, i: usize, j: usize) -> usize {
    let remaining = n - i;
    pair_count(n) - remaining * (remaining - 1) / 2 + (j - i)
}

/// 0-based triangular index of `(i, j)`, `i < j < n`.
pub fn pair_index(n: usize, i: usize, j: usize) -> usize {
    comparisons_so_far(n, i, j) - 1
}

/// Pairs preceding row `i`.
fn row_start(n: usize, i: usize) -> usize {
    pair_count(n) - pair_count(n - i)
}

/// Inverse of [`pair_index`]; `None` past the last pair.
pub fn index_to_pair(n: usize, index: usize) -> Option<(usize, usize)> {
    if index >= pair_count(n) {
        return None;
    }

    // closed form, then nudge for float rounding
    let b = (2 * n - 1) as f64;
    let estimate = ((b - (b * b - 8.0 * index as f64).max(0.0).sqrt()) / 2.0).floor();
    let mut i = (estimate.max(0.0) as usize).min(n - 2);
    while i > 0 && row_start(n, i) > index {
        i -= 1;
    }
    while i + 1 < n - 1 && row_start(n, i + 1) <= index {
        i += 1;
    }

    let j = index - row_start(n, i) + i + 1;
    Some((i, j))
}

/// Decides which pairs the cursor stops on.
pub trait PairFilter {
    /// Number of items being paired.
    fn len(&self) -> usize;

    fn accepts(&mut self, left: usize, right: usize) -> bool;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a video file is still on disk.
pub trait FilePresence {
    fn exists(&self, path: &Path) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiskPresence;

impl FilePresence for DiskPresence {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

impl<F: Fn(&Path) -> bool> FilePresence for F {
    fn exists(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Pairs that satisfy the match policy and whose files both still exist.
pub struct MatchingPairs<'a, P = DiskPresence> {
    records: &'a [VideoRecord],
    thresholds: &'a MatchThresholds,
    presence: P,
    last_verdict: MatchVerdict,
}

impl<'a> MatchingPairs<'a, DiskPresence> {
    pub fn new(records: &'a [VideoRecord], thresholds: &'a MatchThresholds) -> Self {
        Self::with_presence(records, thresholds, DiskPresence)
    }
}

impl<'a, P: FilePresence> MatchingPairs<'a, P> {
    pub fn with_presence(
        records: &'a [VideoRecord],
        thresholds: &'a MatchThresholds,
        presence: P,
    ) -> Self {
        Self {
            records,
            thresholds,
            presence,
            last_verdict: MatchVerdict::default(),
        }
    }

    /// Verdict of the last accepted pair.
    pub fn last_verdict(&self) -> MatchVerdict {
        self.last_verdict
    }
}

impl<P: FilePresence> PairFilter for MatchingPairs<'_, P> {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn accepts(&mut self, left: usize, right: usize) -> bool {
        let (l, r) = (&self.records[left], &self.records[right]);
        let verdict = matches(&l.fingerprint, &r.fingerprint, self.thresholds);
        if !verdict.is_match {
            return false;
        }
        if !self.presence.exists(&l.path) || !self.presence.exists(&r.path) {
            log::debug!("Skipping pair with missing file: {}", l.path.display());
            return false;
        }
        self.last_verdict = verdict;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Result of a navigation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Match { left: usize, right: usize },
    Exhausted,
}

/// Position on the triangular sequence of pairs, stepping between accepted pairs.
#[derive(Debug, Clone)]
pub struct PairCursor {
    len: usize,
    position: Option<usize>,
    direction: Direction,
}

impl PairCursor {
    pub fn new(len: usize) -> Self {
        Self {
            len,
            position: None,
            direction: Direction::Forward,
        }
    }

    /// Cursor placed on the first accepted pair scanning from `(0, 1)`.
    pub fn start<F: PairFilter + ?Sized>(filter: &mut F) -> (Self, Step) {
        let mut cursor = Self::new(filter.len());
        let step = cursor.advance(filter);
        (cursor, step)
    }

    /// Next accepted pair after the current one. On `Exhausted` the cursor
    /// stays where it was before the call.
    pub fn advance<F: PairFilter + ?Sized>(&mut self, filter: &mut F) -> Step {
        self.direction = Direction::Forward;
        let first = self.position.map_or(0, |k| k + 1);

        for index in first..pair_count(self.len) {
            if let Some(step) = self.try_index(filter, index) {
                return step;
            }
        }
        Step::Exhausted
    }

    /// Previous accepted pair. Running past the first pair restarts a
    /// forward scan from `(0, 1)` instead of stopping.
    pub fn retreat<F: PairFilter + ?Sized>(&mut self, filter: &mut F) -> Step {
        self.direction = Direction::Backward;

        if let Some(current) = self.position {
            for index in (0..current).rev() {
                if let Some(step) = self.try_index(filter, index) {
                    return step;
                }
            }
        }

        self.position = None;
        self.advance(filter)
    }

    /// Continue in the direction of the last call, e.g. after the current
    /// pair became invalid.
    pub fn resume<F: PairFilter + ?Sized>(&mut self, filter: &mut F) -> Step {
        match self.direction {
            Direction::Forward => self.advance(filter),
            Direction::Backward => self.retreat(filter),
        }
    }

    pub fn pair(&self) -> Option<(usize, usize)> {
        self.position.and_then(|k| index_to_pair(self.len, k))
    }

    /// 0-based position of the current pair in triangular order.
    pub fn position_ordinal(&self) -> Option<usize> {
        self.pair().map(|(i, j)| pair_index(self.len, i, j))
    }

    /// 1-based comparison count for progress display; 0 before the first pair.
    pub fn comparisons_so_far(&self) -> usize {
        self.pair()
            .map_or(0, |(i, j)| comparisons_so_far(self.len, i, j))
    }

    pub fn total_comparisons(&self) -> usize {
        pair_count(self.len)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    fn try_index<F: PairFilter + ?Sized>(
        &mut self,
        filter: &mut F,
        index: usize,
    ) -> Option<Step> {
        let (left, right) = index_to_pair(self.len, index)?;
        if !filter.accepts(left, right) {
            return None;
        }
        self.position = Some(index);
        Some(Step::Match { left, right })
    }
}
