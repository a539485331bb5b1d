use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";
const FILE_FIELDS: &str = "id,name,parents,trashed,\
    permissions(id,type,role,emailAddress,domain,deleted)";
const PERMISSION_FIELDS: &str = "id,type,role,emailAddress,domain,deleted";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

/// Which folders a listing request selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderQuery {
    ChildrenOf(String),
    /// `parent_id: None` searches every drive the account can see.
    Named {
        parent_id: Option<String>,
        name: String,
    },
    All,
}

impl FolderQuery {
    fn to_query_string(&self) -> String {
        let base = format!("mimeType = '{FOLDER_MIME_TYPE}' and trashed = false");
        match self {
            FolderQuery::ChildrenOf(parent_id) => {
                format!("'{}' in parents and {base}", escape_literal(parent_id))
            }
            FolderQuery::Named { parent_id, name } => {
                let mut query = format!("name = '{}' and {base}", escape_literal(name));
                if let Some(parent_id) = parent_id {
                    query.push_str(&format!(" and '{}' in parents", escape_literal(parent_id)));
                }
                query
            }
            FolderQuery::All => base,
        }
    }
}

fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionOptions {
    pub transfer_ownership: bool,
    pub send_notification_email: bool,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
    token: String,
    page_size: u32,
}

impl DriveClient {
    pub fn new(token: impl Into<String>) -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
            token: token.into(),
            page_size: 100,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, 1000);
        self
    }

    pub async fn list_folders(
        &self,
        query: &FolderQuery,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &query.to_query_string())
                .append_pair("fields", &format!("nextPageToken,files({FILE_FIELDS})"))
                .append_pair("pageSize", &self.page_size.to_string())
                .append_pair("corpora", "allDrives")
                .append_pair("includeItemsFromAllDrives", "true")
                .append_pair("supportsAllDrives", "true");
            if let Some(page_token) = page_token {
                pairs.append_pair("pageToken", page_token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.query_pairs_mut()
            .append_pair("fields", FILE_FIELDS)
            .append_pair("supportsAllDrives", "true");
        let body = NewFolder {
            name,
            mime_type: FOLDER_MIME_TYPE,
            parents: parent_id.map(|id| vec![id]),
        };
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(&body)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_permissions(
        &self,
        file_id: &str,
        page_token: Option<&str>,
    ) -> Result<PermissionList, DriveError> {
        let mut url = self.file_endpoint(file_id, "permissions")?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair(
                    "fields",
                    &format!("nextPageToken,permissions({PERMISSION_FIELDS})"),
                )
                .append_pair("supportsAllDrives", "true");
            if let Some(page_token) = page_token {
                pairs.append_pair("pageToken", page_token);
            }
        }
        let response = self
            .http
            .get(url)
            .header("Authorization", self.auth_header_value())
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn create_permission(
        &self,
        file_id: &str,
        permission: &NewPermission,
        options: PermissionOptions,
    ) -> Result<DrivePermission, DriveError> {
        let mut url = self.file_endpoint(file_id, "permissions")?;
        url.query_pairs_mut()
            .append_pair("fields", PERMISSION_FIELDS)
            .append_pair("supportsAllDrives", "true")
            .append_pair(
                "transferOwnership",
                if options.transfer_ownership {
                    "true"
                } else {
                    "false"
                },
            )
            .append_pair(
                "sendNotificationEmail",
                if options.send_notification_email {
                    "true"
                } else {
                    "false"
                },
            );
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(permission)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, DriveError> {
        Ok(self.base_url.join(path)?)
    }

    fn file_endpoint(&self, file_id: &str, tail: &str) -> Result<Url, DriveError> {
        let mut url = self.endpoint("/drive/v3/files")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(file_id)
            .push(tail);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, DriveError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(DriveError::Api { status, body })
        }
    }
}

impl DriveError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            DriveError::Api { status, .. } => Some(*status),
            DriveError::Request(err) => err.status(),
            DriveError::Url(_) => None,
        }
    }

    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            DriveError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    /// Reason code reported in the service's JSON error body, if any.
    pub fn reason(&self) -> Option<String> {
        let DriveError::Api { body, .. } = self else {
            return None;
        };
        let envelope: ErrorEnvelope = serde_json::from_str(body).ok()?;
        envelope
            .error
            .errors
            .into_iter()
            .find_map(|detail| detail.reason)
            .or(envelope.error.status)
    }

    /// Human readable message from the error body, or the raw body.
    pub fn message(&self) -> String {
        match self {
            DriveError::Api { body, .. } => serde_json::from_str::<ErrorEnvelope>(body)
                .ok()
                .and_then(|envelope| envelope.error.message)
                .unwrap_or_else(|| body.clone()),
            other => other.to_string(),
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewFolder<'a> {
    name: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parents: Option<Vec<&'a str>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
    /// Absent when the caller may not read the sharing list in bulk.
    #[serde(default)]
    pub permissions: Option<Vec<DrivePermission>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrivePermission {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub permission_type: Option<String>,
    pub role: String,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionList {
    #[serde(default)]
    pub permissions: Vec<DrivePermission>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPermission {
    pub role: String,
    #[serde(rename = "type")]
    pub permission_type: String,
    pub email_address: String,
}

impl NewPermission {
    pub fn user(role: impl Into<String>, email_address: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            permission_type: "user".to_string(),
            email_address: email_address.into(),
        }
    }
}
