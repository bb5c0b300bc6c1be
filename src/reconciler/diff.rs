use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff<T: Ord> {
    /// In the old collection only
    pub removed: BTreeSet<T>,
    /// In the new collection only
    pub added: BTreeSet<T>,
}

impl<T: Ord> Diff<T> {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Set difference in both directions. Inputs are treated as sets, so
/// duplicates and ordering make no difference to the result.
pub fn diff<T, O, N>(old: O, new: N) -> Diff<T>
where
    T: Ord + Clone,
    O: IntoIterator<Item = T>,
    N: IntoIterator<Item = T>,
{
    let old: BTreeSet<T> = old.into_iter().collect();
    let new: BTreeSet<T> = new.into_iter().collect();

    Diff {
        removed: old.difference(&new).cloned().collect(),
        added: new.difference(&old).cloned().collect(),
    }
}
