use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::arena::TreeArena;
use super::inserter::{FlatAssembly, OrphanInserter, RequeuePolicy};
use super::node::TreeNode;
use super::permissions::{AncestorClosure, effective_permissions};
use crate::directory::FolderDirectory;
use crate::model::{FolderRecord, PermissionRecord};
use crate::replay::{RetryError, RetryGovernor};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("root path is empty")]
    EmptyPath,
    #[error("folder `{segment}` of `{path}` does not exist")]
    RootNotFound { path: String, segment: String },
    #[error("folder {folder} disappeared while it was being read")]
    MissingFolder {
        folder: String,
        #[source]
        source: RetryError,
    },
    #[error(transparent)]
    Remote(RetryError),
}

/// Splits a root path on `/` or `\`, ignoring empty segments.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(['/', '\\'])
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// Sibling list a snapshot of `path` belongs in.
///
/// For `Team/Projects/2024` this walks (or creates, without permissions)
/// `Team` and `Projects` in `forest`, so several roots sharing a prefix end up
/// in one document under a common hierarchy.
pub fn graft_point<'f>(forest: &'f mut Vec<TreeNode>, path: &str) -> &'f mut Vec<TreeNode> {
    let segments = split_path(path);
    let parents = segments.len().saturating_sub(1);
    let mut level = forest;
    for segment in &segments[..parents] {
        let index = match level.iter().position(|node| node.name == *segment) {
            Some(index) => index,
            None => {
                level.push(TreeNode::new(*segment));
                level.len() - 1
            }
        };
        level = &mut level[index].sub_folders;
    }
    level
}

struct Pending {
    record: FolderRecord,
    parent: usize,
    ancestors: Rc<AncestorClosure>,
}

/// Reads folder hierarchies from a [`FolderDirectory`] into [`TreeNode`]s.
pub struct TreeBuilder<'a, D> {
    directory: &'a D,
    governor: &'a mut RetryGovernor,
}

impl<'a, D: FolderDirectory> TreeBuilder<'a, D> {
    pub fn new(directory: &'a D, governor: &'a mut RetryGovernor) -> Self {
        Self {
            directory,
            governor,
        }
    }

    /// Snapshots every root path into one forest, grafted by path prefix.
    pub async fn snapshot_roots(
        &mut self,
        root_paths: &[String],
        flat: bool,
    ) -> Result<Vec<TreeNode>, SnapshotError> {
        let mut forest = Vec::new();
        for path in root_paths {
            info!(root = %path, "reading folder tree");
            let node = if flat {
                let root = self.resolve_root(path).await?;
                let assembly = self.snapshot_flat(root, RequeuePolicy::default()).await?;
                if !assembly.unplaced.is_empty() {
                    info!(
                        root = %path,
                        outside = assembly.unplaced.len(),
                        "folders not reachable from root were left out"
                    );
                    for record in &assembly.unplaced {
                        debug!(
                            root = %path,
                            folder = %record.id,
                            name = %record.name,
                            parent = ?record.parent_id,
                            "left out"
                        );
                    }
                }
                assembly.forest.into_iter().next()
            } else {
                Some(self.snapshot(path).await?)
            };
            if let Some(node) = node {
                debug!(root = %path, folders = node.node_count(), "root read");
                graft_point(&mut forest, path).push(node);
            }
        }
        Ok(forest)
    }

    /// Finds the folder at `path`. The first segment is matched by name across
    /// every drive the account can see, the rest by name below their parent.
    pub async fn resolve_root(&mut self, path: &str) -> Result<FolderRecord, SnapshotError> {
        let segments = split_path(path);
        if segments.is_empty() {
            return Err(SnapshotError::EmptyPath);
        }
        let directory = self.directory;
        let mut current: Option<FolderRecord> = None;
        for segment in segments {
            let parent_id = current.as_ref().map(|record| record.id.as_str());
            let found = match parent_id {
                // The first segment may live in a shared drive or be shared
                // with the account, so it is looked up everywhere.
                None => {
                    self.governor
                        .call("find folder", move || directory.find_folder_named(segment))
                        .await
                }
                Some(parent_id) => {
                    self.governor
                        .call("find folder", move || {
                            directory.find_child_folder(Some(parent_id), segment)
                        })
                        .await
                }
            };
            match found {
                Ok(Some(record)) => current = Some(record),
                Ok(None) | Err(RetryError::NotFound { .. }) => {
                    return Err(SnapshotError::RootNotFound {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    });
                }
                Err(err) => return Err(SnapshotError::Remote(err)),
            }
        }
        current.ok_or(SnapshotError::EmptyPath)
    }

    pub async fn snapshot(&mut self, root_path: &str) -> Result<TreeNode, SnapshotError> {
        let root = self.resolve_root(root_path).await?;
        self.snapshot_folder(root).await
    }

    /// Depth-first read below `root`: every child is fully expanded before
    /// its next sibling is looked at.
    pub async fn snapshot_folder(&mut self, root: FolderRecord) -> Result<TreeNode, SnapshotError> {
        let mut arena = TreeArena::new();
        let top = Rc::new(AncestorClosure::new());
        let raw = self.raw_permissions(&root).await?;
        let root_index = arena.push(
            TreeNode::new(root.name.clone())
                .with_permissions(effective_permissions(&raw, &top))
                .with_remote_id(root.id.clone()),
            None,
        );
        let mut stack = self
            .pending_children(&root.id, root_index, Rc::new(top.descend(&raw)))
            .await?;

        while let Some(Pending {
            record,
            parent,
            ancestors,
        }) = stack.pop()
        {
            let raw = self.raw_permissions(&record).await?;
            let index = arena.push(
                TreeNode::new(record.name.clone())
                    .with_permissions(effective_permissions(&raw, &ancestors))
                    .with_remote_id(record.id.clone()),
                Some(parent),
            );
            let children = self
                .pending_children(&record.id, index, Rc::new(ancestors.descend(&raw)))
                .await?;
            stack.extend(children);
        }

        debug!(folders = arena.len(), "snapshot assembled");
        arena
            .into_forest()
            .into_iter()
            .next()
            .ok_or_else(|| SnapshotError::RootNotFound {
                path: root.name.clone(),
                segment: root.name,
            })
    }

    /// Reads the flat listing of every folder and places the ones below `root`.
    pub async fn snapshot_flat(
        &mut self,
        root: FolderRecord,
        policy: RequeuePolicy,
    ) -> Result<FlatAssembly, SnapshotError> {
        let raw = self.raw_permissions(&root).await?;
        let mut records = Vec::new();
        let directory = self.directory;
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.as_deref();
            let page = self
                .governor
                .call("list folders", move || directory.list_folders(token))
                .await
                .map_err(SnapshotError::Remote)?;
            for mut record in page.items {
                if record.trashed || record.id == root.id {
                    continue;
                }
                if record.permissions.is_none() {
                    record.permissions = Some(self.raw_permissions(&record).await?);
                }
                records.push(record);
            }
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        let mut assembly = OrphanInserter::new(Some(&root.id), policy)
            .with_root_permissions(&raw)
            .insert_all(records);
        let top = TreeNode::new(root.name.clone())
            .with_permissions(effective_permissions(&raw, &AncestorClosure::new()))
            .with_remote_id(root.id.clone())
            .with_sub_folders(std::mem::take(&mut assembly.forest));
        assembly.forest = vec![top];
        Ok(assembly)
    }

    /// Children of `parent_id` across all pages, queued so that the first
    /// child is popped first.
    async fn pending_children(
        &mut self,
        parent_id: &str,
        parent: usize,
        ancestors: Rc<AncestorClosure>,
    ) -> Result<Vec<Pending>, SnapshotError> {
        let directory = self.directory;
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let token = page_token.as_deref();
            let page = self
                .governor
                .call("list children", move || {
                    directory.list_children(parent_id, token)
                })
                .await
                .map_err(|err| missing_or_remote(parent_id, err))?;
            children.extend(page.items.into_iter().filter(|record| {
                if record.trashed {
                    debug!(folder = %record.id, "skipping trashed folder");
                }
                !record.trashed
            }));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(children
            .into_iter()
            .rev()
            .map(|record| Pending {
                record,
                parent,
                ancestors: Rc::clone(&ancestors),
            })
            .collect())
    }

    async fn raw_permissions(
        &mut self,
        record: &FolderRecord,
    ) -> Result<Vec<PermissionRecord>, SnapshotError> {
        if let Some(permissions) = &record.permissions {
            return Ok(permissions.clone());
        }
        let directory = self.directory;
        let folder_id = record.id.as_str();
        match self
            .governor
            .call("list permissions", move || {
                directory.list_permissions(folder_id)
            })
            .await
        {
            Ok(permissions) => Ok(permissions),
            Err(err) if err.is_not_found() => {
                warn!(folder = %record.id, "sharing list not readable, recording none");
                Ok(Vec::new())
            }
            Err(err) => Err(SnapshotError::Remote(err)),
        }
    }
}

fn missing_or_remote(folder: &str, err: RetryError) -> SnapshotError {
    if err.is_not_found() {
        SnapshotError::MissingFolder {
            folder: folder.to_string(),
            source: err,
        }
    } else {
        SnapshotError::Remote(err)
    }
}
