use drive_core::{
    DriveClient, DriveError, DriveFile, DrivePermission, FolderQuery, NewPermission,
    PermissionOptions,
};
use tracing::warn;

use super::{
    FolderDirectory, FolderPage, PermissionGrant, REASON_TRANSPORT, RemoteError,
};
use crate::model::{FolderRecord, PermissionRecord, Role};

const ACCOUNT_ROOT: &str = "root";

/// [`FolderDirectory`] backed by the Drive REST API.
#[derive(Clone)]
pub struct DriveDirectory {
    client: DriveClient,
}

impl DriveDirectory {
    pub fn new(client: DriveClient) -> Self {
        Self { client }
    }
}

impl FolderDirectory for DriveDirectory {
    async fn list_children(
        &self,
        parent_id: &str,
        page_token: Option<&str>,
    ) -> Result<FolderPage, RemoteError> {
        let query = FolderQuery::ChildrenOf(parent_id.to_string());
        let page = self.client.list_folders(&query, page_token).await?;
        Ok(FolderPage {
            items: page.files.into_iter().map(folder_record).collect(),
            next_page_token: page.next_page_token,
        })
    }

    async fn list_folders(&self, page_token: Option<&str>) -> Result<FolderPage, RemoteError> {
        let page = self.client.list_folders(&FolderQuery::All, page_token).await?;
        Ok(FolderPage {
            items: page.files.into_iter().map(folder_record).collect(),
            next_page_token: page.next_page_token,
        })
    }

    async fn find_child_folder(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<FolderRecord>, RemoteError> {
        let query = FolderQuery::Named {
            parent_id: Some(parent_id.unwrap_or(ACCOUNT_ROOT).to_string()),
            name: name.to_string(),
        };
        let page = self.client.list_folders(&query, None).await?;
        Ok(page
            .files
            .into_iter()
            .find(|file| !file.trashed)
            .map(folder_record))
    }

    async fn find_folder_named(&self, name: &str) -> Result<Option<FolderRecord>, RemoteError> {
        let query = FolderQuery::Named {
            parent_id: None,
            name: name.to_string(),
        };
        let page = self.client.list_folders(&query, None).await?;
        Ok(page
            .files
            .into_iter()
            .find(|file| !file.trashed)
            .map(folder_record))
    }

    async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<String, RemoteError> {
        let created = self.client.create_folder(name, parent_id).await?;
        Ok(created.id)
    }

    async fn list_permissions(
        &self,
        folder_id: &str,
    ) -> Result<Vec<PermissionRecord>, RemoteError> {
        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .client
                .list_permissions(folder_id, page_token.as_deref())
                .await?;
            records.extend(page.permissions.into_iter().filter_map(permission_record));
            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(records)
    }

    async fn write_permission(
        &self,
        folder_id: &str,
        grant: &PermissionGrant,
    ) -> Result<(), RemoteError> {
        let permission = NewPermission::user(grant.role.as_str(), grant.email_address.clone());
        let options = PermissionOptions {
            transfer_ownership: grant.transfer_ownership,
            send_notification_email: grant.send_notification_email,
        };
        self.client
            .create_permission(folder_id, &permission, options)
            .await?;
        Ok(())
    }
}

impl From<DriveError> for RemoteError {
    fn from(err: DriveError) -> Self {
        let status = err.status().map(|status| status.as_u16());
        let reason = match (&err, err.reason()) {
            (_, Some(reason)) => reason,
            (DriveError::Api { status, .. }, None) => {
                RemoteError::reason_for_status(status.as_u16()).to_string()
            }
            (DriveError::Request(_), None) => REASON_TRANSPORT.to_string(),
            (DriveError::Url(_), None) => "invalidUrl".to_string(),
        };
        RemoteError {
            status,
            reason,
            message: err.message(),
        }
    }
}

fn folder_record(file: DriveFile) -> FolderRecord {
    FolderRecord {
        parent_id: file.parents.into_iter().next(),
        permissions: file
            .permissions
            .map(|list| list.into_iter().filter_map(permission_record).collect()),
        id: file.id,
        name: file.name,
        trashed: file.trashed,
    }
}

fn permission_record(permission: DrivePermission) -> Option<PermissionRecord> {
    let role = match permission.role.parse::<Role>() {
        Ok(role) => role,
        Err(err) => {
            warn!(permission_id = ?permission.id, "ignoring permission: {err}");
            return None;
        }
    };
    // Only grants to a single address can be written back.
    if let Some(kind @ ("domain" | "anyone")) = permission.permission_type.as_deref() {
        warn!(
            permission_id = ?permission.id,
            kind,
            domain = ?permission.domain,
            "ignoring grant that is not tied to an address"
        );
        return None;
    }
    Some(PermissionRecord {
        principal: permission.email_address,
        role,
        deleted: permission.deleted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::RetryGovernor;
    use crate::tree::{PermissionEntry, TreeBuilder};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn directory(server: &MockServer) -> DriveDirectory {
        DriveDirectory::new(DriveClient::with_base_url(&server.uri(), "test-token").unwrap())
    }

    #[tokio::test]
    async fn list_children_maps_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{
                    "id": "f1",
                    "name": "Team",
                    "parents": ["p0"],
                    "permissions": [
                        { "role": "writer", "type": "user", "emailAddress": "ann@example.com" },
                        { "role": "reader", "type": "domain", "domain": "example.com" },
                        { "role": "reader", "type": "anyone" },
                        { "role": "superuser", "type": "user", "emailAddress": "x@example.com" }
                    ]
                }]
            })))
            .mount(&server)
            .await;

        let page = directory(&server).list_children("p0", None).await.unwrap();

        let record = &page.items[0];
        assert_eq!(record.parent_id.as_deref(), Some("p0"));
        let permissions = record.permissions.as_ref().unwrap();
        assert_eq!(permissions, &[PermissionRecord::new("ann@example.com", Role::Writer)]);
    }

    #[tokio::test]
    async fn find_child_folder_uses_account_root_alias() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "name = 'Team' and mimeType = 'application/vnd.google-apps.folder' and trashed = false and 'root' in parents",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "f1", "name": "Team" }]
            })))
            .mount(&server)
            .await;

        let found = directory(&server)
            .find_child_folder(None, "Team")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.id, "f1");
        assert!(found.permissions.is_none());
    }

    #[tokio::test]
    async fn named_lookup_searches_every_drive() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "name = 'Team' and mimeType = 'application/vnd.google-apps.folder' and trashed = false",
            ))
            .and(query_param("corpora", "allDrives"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{ "id": "sd1", "name": "Team", "parents": ["0AshareddriveRoot"] }]
            })))
            .mount(&server)
            .await;

        let found = directory(&server)
            .find_folder_named("Team")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(found.id, "sd1");
        assert_eq!(found.parent_id.as_deref(), Some("0AshareddriveRoot"));
    }

    #[tokio::test]
    async fn root_in_a_shared_drive_is_snapshotted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "name = 'Team' and mimeType = 'application/vnd.google-apps.folder' and trashed = false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [{
                    "id": "sd1",
                    "name": "Team",
                    "parents": ["0AshareddriveRoot"],
                    "permissions": [
                        { "role": "writer", "type": "group", "emailAddress": "team@example.com" }
                    ]
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param(
                "q",
                "'sd1' in parents and mimeType = 'application/vnd.google-apps.folder' and trashed = false",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "files": [] })))
            .mount(&server)
            .await;
        let directory = directory(&server);
        let mut governor = RetryGovernor::default();

        let tree = TreeBuilder::new(&directory, &mut governor)
            .snapshot("Team")
            .await
            .unwrap();

        assert_eq!(tree.remote_id.as_deref(), Some("sd1"));
        assert_eq!(
            tree.permissions,
            [PermissionEntry::new(Role::Writer, "team@example.com")]
        );
    }

    #[tokio::test]
    async fn api_errors_without_reason_fall_back_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/drive/v3/files"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let err = directory(&server)
            .create_folder("Team", None)
            .await
            .unwrap_err();

        assert_eq!(err.status, Some(503));
        assert_eq!(err.reason, "backendError");
        assert_eq!(err.message, "unavailable");
    }
}
