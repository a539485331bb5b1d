//! The persisted tree document: a YAML sequence of root folders.
//!
//! ```yaml
//! - name: Team
//!   permissions:
//!   - role: writer
//!     emailAddress: ann@example.com
//!   sub_folders: []
//! ```

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::node::TreeNode;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read tree document {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write tree document {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("tree document is empty")]
    Empty,
    #[error("malformed tree document: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("folder at {location} has an empty name")]
    UnnamedFolder { location: String },
}

pub fn to_yaml(forest: &[TreeNode]) -> Result<String, DocumentError> {
    Ok(serde_yaml::to_string(forest)?)
}

pub fn from_yaml(text: &str) -> Result<Vec<TreeNode>, DocumentError> {
    if text.trim().is_empty() {
        return Err(DocumentError::Empty);
    }
    let forest: Vec<TreeNode> = serde_yaml::from_str(text)?;
    validate(&forest, "")?;
    Ok(forest)
}

pub fn load_document(path: &Path) -> Result<Vec<TreeNode>, DocumentError> {
    let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    from_yaml(&text)
}

pub fn save_document(path: &Path, forest: &[TreeNode]) -> Result<(), DocumentError> {
    let text = to_yaml(forest)?;
    std::fs::write(path, text).map_err(|source| DocumentError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn validate(nodes: &[TreeNode], prefix: &str) -> Result<(), DocumentError> {
    for (position, node) in nodes.iter().enumerate() {
        let location = format!("{prefix}/{position}");
        if node.name.trim().is_empty() {
            return Err(DocumentError::UnnamedFolder { location });
        }
        validate(&node.sub_folders, &location)?;
    }
    Ok(())
}
