//! The remote folder directory as seen by the tree builder and reconstructor.
//!
//! Folder listings return one page per call; paging and retries are layered
//! on top by the callers so that backoff pacing stays in one place. Sharing
//! lists come back whole.

mod drive;
mod memory;

use thiserror::Error;

use crate::model::{FolderRecord, PermissionRecord, Role};

pub use drive::DriveDirectory;
pub use memory::{Call, MemoryDirectory, WrittenPermission};

pub const REASON_NOT_FOUND: &str = "notFound";
pub const REASON_RATE_LIMIT: &str = "rateLimitExceeded";
pub const REASON_BACKEND: &str = "backendError";
pub const REASON_TRANSPORT: &str = "transportError";

/// Structured failure returned by a directory call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {message}")]
pub struct RemoteError {
    pub status: Option<u16>,
    pub reason: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: None,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(REASON_NOT_FOUND, message).with_status(404)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Reason code to use when the service did not name one.
    pub fn reason_for_status(status: u16) -> &'static str {
        match status {
            404 => REASON_NOT_FOUND,
            429 => REASON_RATE_LIMIT,
            500..=599 => REASON_BACKEND,
            _ => "httpError",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderPage {
    pub items: Vec<FolderRecord>,
    pub next_page_token: Option<String>,
}

/// A single permission write as issued during replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionGrant {
    pub role: Role,
    pub email_address: String,
    pub transfer_ownership: bool,
    pub send_notification_email: bool,
}

/// Capabilities the snapshot and replay flows need from the remote service.
///
/// `parent_id: None` in [`FolderDirectory::find_child_folder`] and
/// [`FolderDirectory::create_folder`] addresses the top level of the account.
#[allow(async_fn_in_trait)]
pub trait FolderDirectory {
    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<FolderPage, RemoteError>;

    /// Flat listing of every folder visible to the account, in no particular order.
    async fn list_folders(&self, page_token: Option<&str>) -> Result<FolderPage, RemoteError>;

    async fn find_child_folder(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<FolderRecord>, RemoteError>;

    /// A live folder called `name` anywhere the account can see, shared
    /// drives and folders shared with the account included.
    async fn find_folder_named(&self, name: &str) -> Result<Option<FolderRecord>, RemoteError>;

    async fn create_folder(&self, name: &str, parent_id: Option<&str>)
    -> Result<String, RemoteError>;

    async fn list_permissions(&self, folder_id: &str)
    -> Result<Vec<PermissionRecord>, RemoteError>;

    async fn write_permission(
        &self,
        folder_id: &str,
        grant: &PermissionGrant,
    ) -> Result<(), RemoteError>;
}
