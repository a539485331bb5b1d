use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sharing role, named the way the remote API spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Owner,
    Organizer,
    FileOrganizer,
    Writer,
    Commenter,
    Reader,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Owner => "owner",
            Role::Organizer => "organizer",
            Role::FileOrganizer => "fileOrganizer",
            Role::Writer => "writer",
            Role::Commenter => "commenter",
            Role::Reader => "reader",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role: {}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "owner" => Ok(Role::Owner),
            "organizer" => Ok(Role::Organizer),
            "fileOrganizer" => Ok(Role::FileOrganizer),
            "writer" => Ok(Role::Writer),
            "commenter" => Ok(Role::Commenter),
            "reader" => Ok(Role::Reader),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// One sharing grant as reported by the remote listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRecord {
    /// Email address, or domain for domain-wide grants. Absent for link sharing.
    pub principal: Option<String>,
    pub role: Role,
    pub deleted: bool,
}

impl PermissionRecord {
    pub fn new(principal: impl Into<String>, role: Role) -> Self {
        Self {
            principal: Some(principal.into()),
            role,
            deleted: false,
        }
    }

    pub fn tombstoned(mut self) -> Self {
        self.deleted = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub trashed: bool,
    /// `None` when the listing did not include the sharing list.
    pub permissions: Option<Vec<PermissionRecord>>,
}

impl FolderRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent_id: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent_id: parent_id.map(str::to_string),
            trashed: false,
            permissions: Some(Vec::new()),
        }
    }

    pub fn with_permissions(mut self, permissions: Vec<PermissionRecord>) -> Self {
        self.permissions = Some(permissions);
        self
    }
}

/// Loose shape check used to tell real addresses from placeholder tokens.
pub fn is_email_address(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_api_spelling() {
        for role in [
            Role::Owner,
            Role::Organizer,
            Role::FileOrganizer,
            Role::Writer,
            Role::Commenter,
            Role::Reader,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("admin".parse::<Role>().is_err());
    }

    #[test]
    fn email_shape_check() {
        assert!(is_email_address("ann@example.com"));
        assert!(!is_email_address("TEAM_LEAD"));
        assert!(!is_email_address("ann@localhost"));
        assert!(!is_email_address("a b@example.com"));
        assert!(!is_email_address("@example.com"));
    }
}
