use serde::{Deserialize, Serialize};

use crate::model::Role;

/// A permission that has to be applied explicitly on replay.
///
/// Identity is `(principal, role)`; remote permission ids are never kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PermissionEntry {
    pub role: Role,
    #[serde(rename = "emailAddress")]
    pub email_address: String,
}

impl PermissionEntry {
    pub fn new(role: Role, email_address: impl Into<String>) -> Self {
        Self {
            role,
            email_address: email_address.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TreeNode {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<PermissionEntry>,
    #[serde(default)]
    pub sub_folders: Vec<TreeNode>,
    /// Id on the account the node was read from or written to. Never persisted.
    #[serde(skip)]
    pub remote_id: Option<String>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<PermissionEntry>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_sub_folders(mut self, sub_folders: Vec<TreeNode>) -> Self {
        self.sub_folders = sub_folders;
        self
    }

    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }

    pub fn child(&self, name: &str) -> Option<&TreeNode> {
        self.sub_folders.iter().find(|child| child.name == name)
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self
            .sub_folders
            .iter()
            .map(TreeNode::node_count)
            .sum::<usize>()
    }
}
