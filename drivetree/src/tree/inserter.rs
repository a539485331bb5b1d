//! Tree assembly from a flat, unordered folder listing.
//!
//! A record can arrive before its parent. Records whose parent is not placed
//! yet are deferred and offered again later; assembly stops once the queue is
//! empty or once every pending record has been offered since the last
//! successful placement, in which case the remaining records have no
//! reachable parent and are handed back as unplaced.

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use tracing::{debug, warn};

use super::arena::TreeArena;
use super::node::TreeNode;
use super::permissions::{AncestorClosure, effective_permissions};
use crate::model::{FolderRecord, PermissionRecord};

/// Where a record whose parent is not placed yet goes back into the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequeuePolicy {
    /// Behind every record not yet offered.
    #[default]
    Tail,
    /// Ahead of the queue, as soon as any other record has been placed.
    Head,
}

#[derive(Debug, Default)]
pub struct FlatAssembly {
    pub forest: Vec<TreeNode>,
    /// Records with no resolvable parent, and repeated ids.
    pub unplaced: Vec<FolderRecord>,
}

impl FlatAssembly {
    pub fn is_complete(&self) -> bool {
        self.unplaced.is_empty()
    }
}

pub struct OrphanInserter {
    root_id: Option<String>,
    policy: RequeuePolicy,
    arena: TreeArena,
    slots: HashMap<String, usize>,
    /// Closure handed to the children of each slot, by slot index.
    closures: Vec<Rc<AncestorClosure>>,
    top_closure: Rc<AncestorClosure>,
}

impl OrphanInserter {
    /// With `root_id`, records naming it as parent become top-level nodes and
    /// records without a parent cannot be placed. Without one, parentless
    /// records are the top level.
    pub fn new(root_id: Option<&str>, policy: RequeuePolicy) -> Self {
        Self {
            root_id: root_id.map(str::to_string),
            policy,
            arena: TreeArena::new(),
            slots: HashMap::new(),
            closures: Vec::new(),
            top_closure: Rc::new(AncestorClosure::new()),
        }
    }

    /// Raw grants of the designated root, inherited by top-level nodes.
    pub fn with_root_permissions(mut self, raw: &[PermissionRecord]) -> Self {
        self.top_closure = Rc::new(AncestorClosure::new().descend(raw));
        self
    }

    pub fn insert_all(mut self, records: impl IntoIterator<Item = FolderRecord>) -> FlatAssembly {
        let mut queue: VecDeque<FolderRecord> = VecDeque::new();
        let mut unplaced = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            if record.trashed {
                debug!(folder = %record.id, "skipping trashed folder");
            } else if !seen.insert(record.id.clone()) {
                warn!(folder = %record.id, "folder listed twice, keeping the first");
                unplaced.push(record);
            } else {
                queue.push_back(record);
            }
        }

        let mut deferred: Vec<FolderRecord> = Vec::new();
        let mut misses = 0usize;
        while let Some(record) = queue.pop_front() {
            match self.try_place(record) {
                Ok(()) => {
                    misses = 0;
                    for record in deferred.drain(..).rev() {
                        queue.push_front(record);
                    }
                }
                Err(record) => {
                    misses += 1;
                    match self.policy {
                        RequeuePolicy::Tail => queue.push_back(record),
                        RequeuePolicy::Head => deferred.push(record),
                    }
                    if misses >= queue.len() + deferred.len() {
                        break;
                    }
                }
            }
        }

        let stranded: Vec<FolderRecord> = queue.into_iter().chain(deferred).collect();
        if !stranded.is_empty() {
            warn!(
                count = stranded.len(),
                "folders whose parent never appeared were left unplaced"
            );
        }
        unplaced.extend(stranded);
        FlatAssembly {
            forest: self.arena.into_forest(),
            unplaced,
        }
    }

    fn try_place(&mut self, record: FolderRecord) -> Result<(), FolderRecord> {
        let Some(parent) = self.locate_parent(record.parent_id.as_deref()) else {
            return Err(record);
        };
        let ancestors = match parent {
            Some(slot) => Rc::clone(&self.closures[slot]),
            None => Rc::clone(&self.top_closure),
        };
        let raw = record.permissions.as_deref().unwrap_or_default();
        let node = TreeNode::new(record.name.clone())
            .with_permissions(effective_permissions(raw, &ancestors))
            .with_remote_id(record.id.clone());
        let index = self.arena.push(node, parent);
        self.closures.push(Rc::new(ancestors.descend(raw)));
        self.slots.insert(record.id, index);
        Ok(())
    }

    /// `Some(None)` for the top level, `Some(Some(slot))` under a placed
    /// folder, `None` while the parent is unknown.
    fn locate_parent(&self, parent_id: Option<&str>) -> Option<Option<usize>> {
        match (self.root_id.as_deref(), parent_id) {
            (Some(root_id), Some(parent_id)) if parent_id == root_id => Some(None),
            (None, None) => Some(None),
            (_, Some(parent_id)) => self.slots.get(parent_id).map(|slot| Some(*slot)),
            (Some(_), None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::tree::PermissionEntry;

    fn folder(id: &str, parent: &str) -> FolderRecord {
        FolderRecord::new(id, id, Some(parent))
    }

    fn names(nodes: &[TreeNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    fn chain_is_a_b_c(forest: &[TreeNode]) {
        assert_eq!(names(forest), ["A"]);
        assert_eq!(names(&forest[0].sub_folders), ["B"]);
        assert_eq!(names(&forest[0].sub_folders[0].sub_folders), ["C"]);
    }

    #[test]
    fn reverse_discovery_order_still_builds_the_chain() {
        for policy in [RequeuePolicy::Tail, RequeuePolicy::Head] {
            let records = vec![folder("C", "B"), folder("B", "A"), folder("A", "root")];
            let assembly = OrphanInserter::new(Some("root"), policy).insert_all(records);
            assert!(assembly.is_complete());
            chain_is_a_b_c(&assembly.forest);
        }
    }

    #[test]
    fn dangling_parent_is_reported_after_one_pass() {
        for policy in [RequeuePolicy::Tail, RequeuePolicy::Head] {
            let records = vec![folder("X", "missing")];
            let assembly = OrphanInserter::new(Some("root"), policy).insert_all(records);
            assert!(assembly.forest.is_empty());
            assert_eq!(assembly.unplaced.len(), 1);
            assert_eq!(assembly.unplaced[0].id, "X");
        }
    }

    #[test]
    fn placed_part_survives_dangling_branches() {
        let records = vec![
            folder("Y2", "Y1"),
            folder("B", "A"),
            folder("Y1", "gone"),
            folder("A", "root"),
            folder("Z", "also-gone"),
        ];
        let assembly = OrphanInserter::new(Some("root"), RequeuePolicy::Tail).insert_all(records);

        assert_eq!(names(&assembly.forest), ["A"]);
        assert_eq!(names(&assembly.forest[0].sub_folders), ["B"]);
        let mut unplaced: Vec<_> = assembly.unplaced.iter().map(|r| r.id.as_str()).collect();
        unplaced.sort();
        assert_eq!(unplaced, ["Y1", "Y2", "Z"]);
    }

    #[test]
    fn siblings_follow_placement_order() {
        let records = vec![
            folder("b2", "A"),
            folder("A", "root"),
            folder("b1", "A"),
        ];
        let tail =
            OrphanInserter::new(Some("root"), RequeuePolicy::Tail).insert_all(records.clone());
        assert_eq!(names(&tail.forest[0].sub_folders), ["b1", "b2"]);

        let head = OrphanInserter::new(Some("root"), RequeuePolicy::Head).insert_all(records);
        assert_eq!(names(&head.forest[0].sub_folders), ["b2", "b1"]);
    }

    #[test]
    fn parentless_records_are_top_level_without_designated_root() {
        let records = vec![
            FolderRecord::new("B", "B", Some("A")),
            FolderRecord::new("A", "A", None),
        ];
        let assembly = OrphanInserter::new(None, RequeuePolicy::Tail).insert_all(records);
        assert_eq!(names(&assembly.forest), ["A"]);

        let records = vec![FolderRecord::new("A", "A", None)];
        let assembly = OrphanInserter::new(Some("root"), RequeuePolicy::Tail).insert_all(records);
        assert_eq!(assembly.unplaced.len(), 1);
    }

    #[test]
    fn duplicates_and_trashed_records() {
        let mut trashed = folder("T", "root");
        trashed.trashed = true;
        let records = vec![folder("A", "root"), folder("A", "root"), trashed];
        let assembly = OrphanInserter::new(Some("root"), RequeuePolicy::Tail).insert_all(records);

        assert_eq!(names(&assembly.forest), ["A"]);
        assert_eq!(assembly.unplaced.len(), 1);
        assert_eq!(assembly.unplaced[0].id, "A");
    }

    #[test]
    fn permissions_are_reduced_against_placed_ancestors() {
        let ann = PermissionRecord::new("ann@example.com", Role::Writer);
        let bob = PermissionRecord::new("bob@example.com", Role::Reader);
        let records = vec![
            folder("C", "B").with_permissions(vec![ann.clone(), bob.clone()]),
            folder("B", "A").with_permissions(vec![ann.clone(), bob.clone()]),
            folder("A", "root").with_permissions(vec![ann.clone()]),
        ];
        let assembly = OrphanInserter::new(Some("root"), RequeuePolicy::Tail)
            .with_root_permissions(&[ann])
            .insert_all(records);

        let a = &assembly.forest[0];
        let b = &a.sub_folders[0];
        let c = &b.sub_folders[0];
        assert!(a.permissions.is_empty());
        assert_eq!(
            b.permissions,
            [PermissionEntry::new(Role::Reader, "bob@example.com")]
        );
        assert!(c.permissions.is_empty());
        assert_eq!(c.remote_id.as_deref(), Some("C"));
    }
}
