use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::progress::Progress;
use super::retry::{RetryError, RetryGovernor};
use crate::directory::{FolderDirectory, PermissionGrant};
use crate::model::{Role, is_email_address};
use crate::tree::{PermissionEntry, TreeNode};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("parent of folder `{name}` is gone")]
    MissingParent {
        name: String,
        #[source]
        source: RetryError,
    },
    #[error(transparent)]
    Remote(#[from] RetryError),
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    /// Address that receives ownership wherever it appears in the tree.
    pub new_owner: Option<String>,
    /// Substitutes for principals that are not email addresses.
    pub placeholders: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub created: usize,
    pub reused: usize,
    pub permissions_written: usize,
    pub permissions_skipped: usize,
    /// Source id to new id, for nodes that still carry their source id.
    /// Documents do not persist source ids, so a replay of a loaded
    /// document leaves this empty; only trees handed over in memory from a
    /// snapshot fill it.
    pub id_map: BTreeMap<String, String>,
    /// Ids of the folders created or reused for the document's roots.
    pub root_ids: Vec<String>,
}

/// Depth-first replay of a tree document onto a [`FolderDirectory`].
///
/// A parent is always finished, permissions included, before any of its
/// children is created, since children are created inside the parent's
/// freshly assigned id.
pub struct Reconstructor<'a, D> {
    directory: &'a D,
    governor: &'a mut RetryGovernor,
    options: &'a ReplayOptions,
    progress: Progress,
}

impl<'a, D: FolderDirectory> Reconstructor<'a, D> {
    pub fn new(
        directory: &'a D,
        governor: &'a mut RetryGovernor,
        options: &'a ReplayOptions,
    ) -> Self {
        Self {
            directory,
            governor,
            options,
            progress: Progress::default(),
        }
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub async fn replay(&mut self, forest: &[TreeNode]) -> Result<ReplayReport, ReplayError> {
        self.progress = Progress::for_forest(forest);
        info!(operations = self.progress.total(), "replaying tree");
        let mut report = ReplayReport::default();
        let mut stack: Vec<(&TreeNode, Option<String>)> =
            forest.iter().rev().map(|node| (node, None)).collect();

        while let Some((node, parent_id)) = stack.pop() {
            let folder_id = self
                .place_folder(node, parent_id.as_deref(), &mut report)
                .await?;
            self.apply_permissions(node, &folder_id, &mut report).await?;
            if let Some(source_id) = &node.remote_id {
                report.id_map.insert(source_id.clone(), folder_id.clone());
            }
            if parent_id.is_none() {
                report.root_ids.push(folder_id.clone());
            }
            stack.extend(
                node.sub_folders
                    .iter()
                    .rev()
                    .map(|child| (child, Some(folder_id.clone()))),
            );
        }

        info!(
            created = report.created,
            reused = report.reused,
            permissions = report.permissions_written,
            skipped = report.permissions_skipped,
            "replay finished"
        );
        Ok(report)
    }

    /// Creates the folder for `node`, or reuses a same-named one when the
    /// node has no permissions to apply.
    async fn place_folder(
        &mut self,
        node: &TreeNode,
        parent_id: Option<&str>,
        report: &mut ReplayReport,
    ) -> Result<String, ReplayError> {
        let directory = self.directory;
        let name = node.name.as_str();
        if node.permissions.is_empty() {
            let existing = self
                .governor
                .call("find folder", move || {
                    directory.find_child_folder(parent_id, name)
                })
                .await;
            match existing {
                Ok(Some(folder)) => {
                    report.reused += 1;
                    self.progress.advance(&format!("reused folder {name}"));
                    return Ok(folder.id);
                }
                Ok(None) => {}
                Err(err) if err.is_not_found() => {
                    debug!(folder = name, "lookup target missing, creating instead");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let folder_id = self
            .governor
            .call("create folder", move || directory.create_folder(name, parent_id))
            .await
            .map_err(|source| {
                if source.is_not_found() {
                    ReplayError::MissingParent {
                        name: name.to_string(),
                        source,
                    }
                } else {
                    ReplayError::Remote(source)
                }
            })?;
        report.created += 1;
        self.progress.advance(&format!("created folder {name}"));
        Ok(folder_id)
    }

    async fn apply_permissions(
        &mut self,
        node: &TreeNode,
        folder_id: &str,
        report: &mut ReplayReport,
    ) -> Result<(), ReplayError> {
        let directory = self.directory;
        for entry in &node.permissions {
            let Some(grant) = self.grant_for(entry) else {
                warn!(
                    folder = %node.name,
                    principal = %entry.email_address,
                    "no email address for principal, permission not applied"
                );
                report.permissions_skipped += 1;
                self.progress
                    .skip(&format!("{} on {}", entry.email_address, node.name));
                continue;
            };
            let grant = &grant;
            self.governor
                .call_awaiting_visibility("write permission", move || {
                    directory.write_permission(folder_id, grant)
                })
                .await?;
            report.permissions_written += 1;
            self.progress.advance(&format!(
                "granted {} to {} on {}",
                grant.role, grant.email_address, node.name
            ));
        }
        Ok(())
    }

    fn grant_for(&self, entry: &PermissionEntry) -> Option<PermissionGrant> {
        let email_address = self.resolve_principal(&entry.email_address)?;
        let is_new_owner = self
            .options
            .new_owner
            .as_deref()
            .is_some_and(|owner| owner.eq_ignore_ascii_case(&email_address));
        if is_new_owner {
            return Some(PermissionGrant {
                role: Role::Owner,
                email_address,
                transfer_ownership: true,
                send_notification_email: true,
            });
        }
        let role = if entry.role == Role::Owner {
            warn!(
                principal = %email_address,
                "ownership only moves to the designated owner, granting writer"
            );
            Role::Writer
        } else {
            entry.role
        };
        Some(PermissionGrant {
            role,
            email_address,
            transfer_ownership: false,
            send_notification_email: false,
        })
    }

    fn resolve_principal(&self, principal: &str) -> Option<String> {
        if is_email_address(principal) {
            return Some(principal.to_string());
        }
        self.options
            .placeholders
            .get(principal)
            .filter(|substitute| is_email_address(substitute))
            .cloned()
    }
}
