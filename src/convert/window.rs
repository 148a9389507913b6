use std::collections::{BTreeMap, VecDeque};

use crate::git::Tree;

/// A copy-from references a revision for which no snapshot is retained at
/// all. Fatal during conversion.
#[derive(Debug)]
pub(crate) struct MissingPastTree {
    pub(crate) rev: u32,
    pub(crate) path: Vec<u8>,
}

impl std::fmt::Display for MissingPastTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "could not find a tree for \"{}\", r{}",
            self.path.escape_ascii(),
            self.rev,
        )
    }
}

/// The bounded set of historical mirror trees kept in memory to satisfy
/// pending copy-from references.
///
/// `rev_trees` maps a revision number to the tree mirroring the whole SVN
/// filesystem at the end of that revision. `copy_from` holds the
/// reservations recorded by the prescan, sorted by source revision, so
/// eviction can retire snapshots as soon as the last copy needing them has
/// been replayed.
pub(crate) struct RevTreeWindow {
    rev_trees: BTreeMap<u32, Tree>,
    copy_from: VecDeque<(u32, u32)>,
}

impl RevTreeWindow {
    pub(crate) fn new() -> Self {
        Self {
            rev_trees: BTreeMap::new(),
            copy_from: VecDeque::new(),
        }
    }

    /// Records that `using_rev` copies from `copied_from_rev`. Consecutive
    /// duplicates (a directory copy expands to many nodes) are collapsed.
    pub(crate) fn reserve(&mut self, using_rev: u32, copied_from_rev: u32) {
        if self.copy_from.back() != Some(&(using_rev, copied_from_rev)) {
            self.copy_from.push_back((using_rev, copied_from_rev));
        }
    }

    /// Orders reservations by source revision; called once after prescan so
    /// the eviction policy is well-defined.
    pub(crate) fn sort_reservations(&mut self) {
        self.copy_from
            .make_contiguous()
            .sort_by_key(|&(_, copied_from_rev)| copied_from_rev);
    }

    #[inline]
    pub(crate) fn reservations(&self) -> impl Iterator<Item = &(u32, u32)> {
        self.copy_from.iter()
    }

    /// Retains the snapshot of `rev`. Called when the flush of `rev`
    /// modified at least one branch.
    pub(crate) fn insert(&mut self, rev: u32, tree: Tree) {
        let prev = self.rev_trees.insert(rev, tree);
        debug_assert!(prev.is_none(), "snapshot for r{rev} already retained");
    }

    /// Retires reservations fully behind `last_rev` and drops the snapshots
    /// nothing can refer to anymore, keeping exactly one snapshot at or
    /// below the largest retired source revision.
    pub(crate) fn free_past_trees(&mut self, last_rev: u32) {
        let mut popped = None;
        while let Some(&(using_rev, copied_from_rev)) = self.copy_from.front() {
            if last_rev > copied_from_rev && last_rev > using_rev {
                tracing::debug!("r{using_rev} no longer needs r{copied_from_rev}");
                popped = Some(copied_from_rev);
                self.copy_from.pop_front();
            } else {
                break;
            }
        }

        let Some(popped) = popped else { return };
        tracing::debug!("{} tree reservations remain", self.copy_from.len());

        if let Some(keep) = self
            .rev_trees
            .range(..=popped)
            .next_back()
            .map(|(&rev, _)| rev)
        {
            let first = *self.rev_trees.keys().next().unwrap();
            if first < keep {
                tracing::debug!("deleting rev trees from r{first} below r{keep}");
                self.rev_trees = self.rev_trees.split_off(&keep);
            }
        }
    }

    /// The snapshot with the greatest revision at or below `rev`. When every
    /// retained snapshot is newer, the oldest one is returned as a degraded
    /// fallback (with a warning); an empty window is a hard failure.
    pub(crate) fn past_tree(&self, rev: u32, path: &[u8]) -> Result<&Tree, MissingPastTree> {
        if let Some((_, tree)) = self.rev_trees.range(..=rev).next_back() {
            return Ok(tree);
        }
        if let Some((&oldest, tree)) = self.rev_trees.iter().next() {
            tracing::warn!(
                "r{rev}: no retained tree at or below r{rev} for \"{}\", using r{oldest}",
                path.escape_ascii(),
            );
            return Ok(tree);
        }
        Err(MissingPastTree {
            rev,
            path: path.to_vec(),
        })
    }

    #[cfg(test)]
    pub(crate) fn retained_revs(&self) -> Vec<u32> {
        self.rev_trees.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::RevTreeWindow;
    use crate::git::Tree;

    fn window_with_revs(revs: &[u32]) -> RevTreeWindow {
        let mut window = RevTreeWindow::new();
        for &rev in revs {
            window.insert(rev, Tree::new(Vec::new()));
        }
        window
    }

    #[test]
    fn reservations_deduplicate_consecutive_pairs() {
        let mut window = RevTreeWindow::new();
        window.reserve(6, 3);
        window.reserve(6, 3);
        window.reserve(10, 7);
        window.reserve(6, 3);
        assert_eq!(
            window.reservations().copied().collect::<Vec<_>>(),
            [(6, 3), (10, 7), (6, 3)],
        );
    }

    #[test]
    fn eviction_keeps_one_snapshot_at_or_below_popped() {
        let mut window = window_with_revs(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        window.reserve(6, 3);
        window.reserve(10, 7);
        window.sort_reservations();

        // nothing retired while r6 is still ahead
        window.free_past_trees(5);
        assert_eq!(window.retained_revs().len(), 10);

        // past r6: the (6, 3) reservation retires, r3 stays as the boundary
        window.free_past_trees(7);
        assert_eq!(window.retained_revs(), [3, 4, 5, 6, 7, 8, 9, 10]);

        // past r10: (10, 7) retires too, r7 stays
        window.free_past_trees(11);
        assert_eq!(window.retained_revs(), [7, 8, 9, 10]);
    }

    #[test]
    fn eviction_without_pops_is_a_noop() {
        let mut window = window_with_revs(&[1, 2, 3]);
        window.free_past_trees(100);
        assert_eq!(window.retained_revs(), [1, 2, 3]);
    }

    #[test]
    fn past_tree_picks_greatest_at_or_below() {
        let mut window = RevTreeWindow::new();
        for rev in [2_u32, 5, 9] {
            let mut tree = Tree::new(Vec::new());
            tree.update(
                format!("r{rev}").as_bytes(),
                crate::git::Object::Tree(std::rc::Rc::new(Tree::new(
                    format!("r{rev}").into_bytes(),
                ))),
            );
            window.insert(rev, tree);
        }

        // exact hit and between-revision hits
        assert!(window.past_tree(5, b"p").unwrap().lookup(b"r5").is_some());
        assert!(window.past_tree(7, b"p").unwrap().lookup(b"r5").is_some());
        assert!(window.past_tree(100, b"p").unwrap().lookup(b"r9").is_some());
        // below all snapshots: degraded fallback to the oldest
        assert!(window.past_tree(1, b"p").unwrap().lookup(b"r2").is_some());
    }

    #[test]
    fn empty_window_is_fatal() {
        let window = RevTreeWindow::new();
        let err = window.past_tree(3, b"trunk/a.c").unwrap_err();
        assert_eq!(err.rev, 3);
        assert_eq!(err.path, b"trunk/a.c");
    }
}
