//! Cumulative weight tables and tag filters

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cumulative weight table over the children of one task set
///
/// Entry `i` holds the sum of the weights of children `0..=i`. A draw `d`
/// uniform in `[0, total)` selects the first child whose cumulative weight
/// exceeds `d`; the intervals are disjoint so there are no ties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightTable {
    cumulative: Vec<u64>,
}

impl WeightTable {
    /// Build a table from child weights
    pub fn new(weights: impl IntoIterator<Item = u32>) -> Self {
        let mut total = 0u64;
        let cumulative = weights
            .into_iter()
            .map(|w| {
                total += u64::from(w);
                total
            })
            .collect();
        Self { cumulative }
    }

    /// Sum of all weights
    pub fn total(&self) -> u64 {
        self.cumulative.last().copied().unwrap_or(0)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Index selected by a draw in `[0, total)`
    pub fn index_for(&self, draw: u64) -> Option<usize> {
        if draw >= self.total() {
            return None;
        }
        Some(self.cumulative.partition_point(|&c| c <= draw))
    }

    /// Draw an index; `None` when the table is empty
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        match self.total() {
            0 => None,
            total => self.index_for(rng.gen_range(0..total)),
        }
    }
}

/// Weighted pick among the entries accepted by `keep`
///
/// The candidate set is restricted first and the weights are normalized
/// over what is left, so relative proportions inside the subset hold.
pub fn pick_filtered<R, F>(weights: &[u32], mut keep: F, rng: &mut R) -> Option<usize>
where
    R: Rng + ?Sized,
    F: FnMut(usize) -> bool,
{
    let candidates: Vec<usize> = (0..weights.len()).filter(|&i| keep(i)).collect();
    let table = WeightTable::new(candidates.iter().map(|&i| weights[i]));
    table.pick(rng).map(|slot| candidates[slot])
}

/// Tag based restriction of selectable actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TagFilter {
    /// When non-empty, an action must carry at least one of these tags
    pub include: BTreeSet<String>,
    /// An action carrying any of these tags is never selected
    pub exclude: BTreeSet<String>,
}

impl TagFilter {
    /// Filter matching every action
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter keeping actions that carry any of `tags`
    pub fn any_of<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            include: tags.into_iter().map(Into::into).collect(),
            exclude: BTreeSet::new(),
        }
    }

    /// Also drop actions carrying any of `tags`
    pub fn excluding<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.exclude.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Whether the filter keeps everything
    pub fn is_unrestricted(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether an action with these tags passes the filter
    pub fn matches(&self, tags: &BTreeSet<String>) -> bool {
        let included = self.include.is_empty() || !self.include.is_disjoint(tags);
        included && self.exclude.is_disjoint(tags)
    }
}
