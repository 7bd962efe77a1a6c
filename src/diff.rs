//! Diff between the bookmarks reachable in the tree and the indexed corpus.

use std::collections::HashSet;

use crate::source::SourceBookmark;

/// What a sync pass has to do to bring the corpus up to date.
#[derive(Debug, Default, PartialEq)]
pub struct CorpusDiff {
    /// Reachable bookmarks with no record yet, in tree order.
    pub to_add: Vec<SourceBookmark>,
    /// Stored ids that are no longer reachable.
    pub to_remove: Vec<String>,
}

impl CorpusDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Compute the diff for one sync pass.
///
/// Removals are recomputed from scratch every time: any stored id absent
/// from the reachable set goes, no matter how it got stored. Bookmarks on
/// the dead-link list are never re-added; they have no stored record, so
/// they never show up in removals either.
pub fn compute(
    reachable: Vec<SourceBookmark>,
    stored_ids: &[String],
    dead_ids: &[String],
) -> CorpusDiff {
    let stored: HashSet<&str> = stored_ids.iter().map(String::as_str).collect();
    let dead: HashSet<&str> = dead_ids.iter().map(String::as_str).collect();
    let reachable_ids: HashSet<&str> = reachable.iter().map(|b| b.id.as_str()).collect();

    let to_remove = stored_ids
        .iter()
        .filter(|id| !reachable_ids.contains(id.as_str()))
        .cloned()
        .collect();

    let to_add = reachable
        .iter()
        .filter(|b| !stored.contains(b.id.as_str()) && !dead.contains(b.id.as_str()))
        .cloned()
        .collect();

    CorpusDiff { to_add, to_remove }
}
