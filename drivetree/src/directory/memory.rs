use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use super::{FolderDirectory, FolderPage, PermissionGrant, RemoteError};
use crate::model::{FolderRecord, PermissionRecord, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    ListChildren,
    ListFolders,
    FindChild,
    FindNamed,
    CreateFolder,
    ListPermissions,
    WritePermission,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPermission {
    pub folder_id: String,
    pub grant: PermissionGrant,
}

#[derive(Debug, Clone)]
struct StoredFolder {
    id: String,
    name: String,
    parent_id: Option<String>,
    trashed: bool,
    permissions: Vec<PermissionRecord>,
    /// Permission writes that must still fail with `notFound`.
    invisible_for: u32,
}

#[derive(Debug, Default)]
struct State {
    folders: Vec<StoredFolder>,
    next_id: u64,
    failures: HashMap<Call, VecDeque<RemoteError>>,
    calls: Vec<(Call, Instant)>,
    /// Parent of every `list_children` request, in request order.
    listed_parents: Vec<String>,
    written: Vec<WrittenPermission>,
}

/// In-process folder directory.
///
/// Drives `replay --dry-run` and the tests. Failures can be scripted per call
/// kind, and freshly created folders can be hidden from the permission
/// endpoint for a number of writes to mimic the remote consistency lag.
#[derive(Debug)]
pub struct MemoryDirectory {
    state: Mutex<State>,
    page_size: usize,
    omit_listed_permissions: bool,
    visibility_lag: u32,
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: 100,
            omit_listed_permissions: false,
            visibility_lag: 0,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Listings report `permissions: None`, forcing a `list_permissions` call.
    pub fn omitting_listed_permissions(mut self) -> Self {
        self.omit_listed_permissions = true;
        self
    }

    pub fn with_visibility_lag(mut self, writes: u32) -> Self {
        self.visibility_lag = writes;
        self
    }

    /// Seeds a folder and returns its id.
    pub fn add_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
        permissions: Vec<PermissionRecord>,
    ) -> String {
        let mut state = self.lock();
        let id = state.allocate_id();
        state.folders.push(StoredFolder {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            trashed: false,
            permissions,
            invisible_for: 0,
        });
        id
    }

    pub fn trash(&self, folder_id: &str) {
        let mut state = self.lock();
        if let Some(folder) = state.folder_mut(folder_id) {
            folder.trashed = true;
        }
    }

    pub fn fail_next(&self, call: Call, error: RemoteError) {
        self.lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self, call: Call) -> Vec<Instant> {
        self.lock()
            .calls
            .iter()
            .filter(|(kind, _)| *kind == call)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Parents whose children were listed, one entry per page request.
    pub fn listed_parents(&self) -> Vec<String> {
        self.lock().listed_parents.clone()
    }

    pub fn written_permissions(&self) -> Vec<WrittenPermission> {
        self.lock().written.clone()
    }

    pub fn folder_count(&self) -> usize {
        self.lock().folders.len()
    }

    /// Live children of `parent_id` (`None` for top level) as `(id, name)`.
    pub fn children_of(&self, parent_id: Option<&str>) -> Vec<(String, String)> {
        self.lock()
            .folders
            .iter()
            .filter(|folder| !folder.trashed && folder.parent_id.as_deref() == parent_id)
            .map(|folder| (folder.id.clone(), folder.name.clone()))
            .collect()
    }

    pub fn permissions_of(&self, folder_id: &str) -> Vec<PermissionRecord> {
        self.lock()
            .folders
            .iter()
            .find(|folder| folder.id == folder_id)
            .map(|folder| folder.permissions.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, call: Call) -> Result<MutexGuard<'_, State>, RemoteError> {
        let mut state = self.lock();
        state.calls.push((call, Instant::now()));
        if let Some(error) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        Ok(state)
    }

    fn record(&self, folder: &StoredFolder) -> FolderRecord {
        FolderRecord {
            id: folder.id.clone(),
            name: folder.name.clone(),
            parent_id: folder.parent_id.clone(),
            trashed: folder.trashed,
            permissions: (!self.omit_listed_permissions).then(|| folder.permissions.clone()),
        }
    }

    fn page<'a>(
        &self,
        matches: impl Iterator<Item = &'a StoredFolder>,
        page_token: Option<&str>,
    ) -> Result<FolderPage, RemoteError> {
        let offset = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| RemoteError::new("invalidPageToken", token).with_status(400))?,
            None => 0,
        };
        let mut items: Vec<FolderRecord> = matches
            .skip(offset)
            .take(self.page_size + 1)
            .map(|folder| self.record(folder))
            .collect();
        let next_page_token = if items.len() > self.page_size {
            items.truncate(self.page_size);
            Some((offset + self.page_size).to_string())
        } else {
            None
        };
        Ok(FolderPage {
            items,
            next_page_token,
        })
    }
}

impl State {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mem-{}", self.next_id)
    }

    fn folder_mut(&mut self, folder_id: &str) -> Option<&mut StoredFolder> {
        self.folders.iter_mut().find(|folder| folder.id == folder_id)
    }

    fn exists(&self, folder_id: &str) -> bool {
        self.folders
            .iter()
            .any(|folder| folder.id == folder_id && !folder.trashed)
    }
}

impl FolderDirectory for MemoryDirectory {
    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<FolderPage, RemoteError> {
        let mut state = self.enter(Call::ListChildren)?;
        state.listed_parents.push(parent_id.to_string());
        if !state.exists(parent_id) {
            return Err(RemoteError::not_found(format!("File not found: {parent_id}.")));
        }
        let matches = state
            .folders
            .iter()
            .filter(|folder| !folder.trashed && folder.parent_id.as_deref() == Some(parent_id));
        self.page(matches, page_token)
    }

    async fn list_folders(&self, page_token: Option<&str>) -> Result<FolderPage, RemoteError> {
        let state = self.enter(Call::ListFolders)?;
        let matches = state.folders.iter().filter(|folder| !folder.trashed);
        self.page(matches, page_token)
    }

    async fn find_child_folder(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<FolderRecord>, RemoteError> {
        let state = self.enter(Call::FindChild)?;
        if let Some(parent_id) = parent_id
            && !state.exists(parent_id)
        {
            return Err(RemoteError::not_found(format!("File not found: {parent_id}.")));
        }
        Ok(state
            .folders
            .iter()
            .find(|folder| {
                !folder.trashed && folder.name == name && folder.parent_id.as_deref() == parent_id
            })
            .map(|folder| self.record(folder)))
    }

    async fn find_folder_named(&self, name: &str) -> Result<Option<FolderRecord>, RemoteError> {
        let state = self.enter(Call::FindNamed)?;
        let mut matches = state
            .folders
            .iter()
            .filter(|folder| !folder.trashed && folder.name == name);
        let first = matches.clone().find(|folder| folder.parent_id.is_none());
        Ok(first.or_else(|| matches.next()).map(|folder| self.record(folder)))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, RemoteError> {
        let mut state = self.enter(Call::CreateFolder)?;
        if let Some(parent_id) = parent_id
            && !state.exists(parent_id)
        {
            return Err(RemoteError::not_found(format!("File not found: {parent_id}.")));
        }
        let id = state.allocate_id();
        state.folders.push(StoredFolder {
            id: id.clone(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            trashed: false,
            permissions: Vec::new(),
            invisible_for: self.visibility_lag,
        });
        Ok(id)
    }

    async fn list_permissions(
        &self,
        folder_id: &str,
    ) -> Result<Vec<PermissionRecord>, RemoteError> {
        let state = self.enter(Call::ListPermissions)?;
        state
            .folders
            .iter()
            .find(|folder| folder.id == folder_id && !folder.trashed)
            .map(|folder| folder.permissions.clone())
            .ok_or_else(|| RemoteError::not_found(format!("File not found: {folder_id}.")))
    }

    async fn write_permission(
        &self,
        folder_id: &str,
        grant: &PermissionGrant,
    ) -> Result<(), RemoteError> {
        let mut state = self.enter(Call::WritePermission)?;
        let Some(folder) = state
            .folder_mut(folder_id)
            .filter(|folder| !folder.trashed)
        else {
            return Err(RemoteError::not_found(format!("File not found: {folder_id}.")));
        };
        if folder.invisible_for > 0 {
            folder.invisible_for -= 1;
            return Err(RemoteError::not_found(format!("File not found: {folder_id}.")));
        }
        if grant.role == Role::Owner && !grant.transfer_ownership {
            return Err(RemoteError::new(
                "invalidSharingRequest",
                "ownership can only be granted with transferOwnership",
            )
            .with_status(403));
        }
        if grant.transfer_ownership {
            for existing in folder.permissions.iter_mut() {
                if existing.role == Role::Owner {
                    existing.role = Role::Writer;
                }
            }
        }
        match folder
            .permissions
            .iter_mut()
            .find(|existing| existing.principal.as_deref() == Some(grant.email_address.as_str()))
        {
            Some(existing) => existing.role = grant.role,
            None => folder
                .permissions
                .push(PermissionRecord::new(grant.email_address.clone(), grant.role)),
        }
        state.written.push(WrittenPermission {
            folder_id: folder_id.to_string(),
            grant: grant.clone(),
        });
        Ok(())
    }
}
