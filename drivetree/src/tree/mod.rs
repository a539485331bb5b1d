//! Folder tree model and the two ways of assembling it from a remote listing.

mod arena;
pub mod builder;
pub mod document;
pub mod inserter;
mod node;
pub mod permissions;

pub use builder::{SnapshotError, TreeBuilder, graft_point, split_path};
pub use document::{DocumentError, from_yaml, load_document, save_document, to_yaml};
pub use inserter::{FlatAssembly, OrphanInserter, RequeuePolicy};
pub use node::{PermissionEntry, TreeNode};
pub use permissions::{AncestorClosure, effective_permissions};
