//! Reduction of raw sharing lists to the grants a node does not inherit.
//!
//! Children inherit every grant of every ancestor, so a node only has to
//! record what its ancestor closure does not already imply. The closure handed
//! down to a child is built from the parent's *raw* grants, not its reduced
//! list: a grant the parent repeats from the grandparent must still be
//! recognised two levels down.

use std::collections::HashSet;

use tracing::debug;

use super::node::PermissionEntry;
use crate::model::PermissionRecord;

/// Union of the live grants of every ancestor of a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestorClosure {
    grants: HashSet<PermissionEntry>,
}

impl AncestorClosure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, entry: &PermissionEntry) -> bool {
        self.grants.contains(entry)
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PermissionEntry> {
        self.grants.iter()
    }

    /// Closure seen by the children of a node whose raw list is `raw`.
    pub fn descend(&self, raw: &[PermissionRecord]) -> AncestorClosure {
        let mut grants = self.grants.clone();
        grants.extend(live_entries(raw));
        AncestorClosure { grants }
    }
}

impl FromIterator<PermissionEntry> for AncestorClosure {
    fn from_iter<I: IntoIterator<Item = PermissionEntry>>(iter: I) -> Self {
        Self {
            grants: iter.into_iter().collect(),
        }
    }
}

/// Live grants of a raw list: tombstones and principal-less grants are dropped.
pub fn live_entries(raw: &[PermissionRecord]) -> impl Iterator<Item = PermissionEntry> + '_ {
    raw.iter().filter(|record| !record.deleted).filter_map(|record| {
        match record.principal.as_deref() {
            Some(principal) => Some(PermissionEntry::new(record.role, principal)),
            None => {
                debug!(role = %record.role, "skipping permission without a principal");
                None
            }
        }
    })
}

/// The grants of `raw` not implied by `ancestors`, in listing order, without repeats.
pub fn effective_permissions(
    raw: &[PermissionRecord],
    ancestors: &AncestorClosure,
) -> Vec<PermissionEntry> {
    let mut seen = HashSet::new();
    live_entries(raw)
        .filter(|entry| !ancestors.contains(entry))
        .filter(|entry| seen.insert(entry.clone()))
        .collect()
}
