use tracing::info;

use crate::tree::TreeNode;

/// Remote operations a replay of `forest` issues: one per folder plus one
/// per permission write.
pub fn count_operations(forest: &[TreeNode]) -> u64 {
    forest
        .iter()
        .map(|node| 1 + node.permissions.len() as u64 + count_operations(&node.sub_folders))
        .sum()
}

/// Observational counter; nothing in the replay branches on it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    total: u64,
    completed: u64,
    skipped: u64,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn for_forest(forest: &[TreeNode]) -> Self {
        Self::new(count_operations(forest))
    }

    pub fn advance(&mut self, what: &str) {
        self.completed += 1;
        info!(
            done = self.completed + self.skipped,
            total = self.total,
            "{what}"
        );
    }

    /// An operation that was planned but will not be issued.
    pub fn skip(&mut self, what: &str) {
        self.skipped += 1;
        info!(
            done = self.completed + self.skipped,
            total = self.total,
            "skipped: {what}"
        );
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn is_finished(&self) -> bool {
        self.completed + self.skipped >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::tree::PermissionEntry;

    #[test]
    fn counts_folders_and_permission_writes() {
        let forest = vec![
            TreeNode::new("A")
                .with_permissions(vec![
                    PermissionEntry::new(Role::Writer, "ann@example.com"),
                    PermissionEntry::new(Role::Reader, "bob@example.com"),
                ])
                .with_sub_folders(vec![
                    TreeNode::new("A1"),
                    TreeNode::new("A2").with_permissions(vec![PermissionEntry::new(
                        Role::Reader,
                        "cy@example.com",
                    )]),
                ]),
            TreeNode::new("B"),
        ];
        assert_eq!(count_operations(&forest), 7);
        assert_eq!(count_operations(&[]), 0);
    }

    #[test]
    fn skipped_operations_count_towards_completion() {
        let mut progress = Progress::new(2);
        progress.advance("created A");
        assert!(!progress.is_finished());
        progress.skip("permission for TEAM");
        assert!(progress.is_finished());
        assert_eq!(progress.completed(), 1);
        assert_eq!(progress.skipped(), 1);
    }
}
