mod client;

pub use client::{
    ApiErrorClass, DriveClient, DriveError, DriveFile, DrivePermission, FileList, FolderQuery,
    NewPermission, PermissionList, PermissionOptions, FOLDER_MIME_TYPE,
};
