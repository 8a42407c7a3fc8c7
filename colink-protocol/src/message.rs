//! Command tags and JSON message payloads.
//!
//! Requests and responses for an operation share the same command tag.
//! Responses are decoded into the closed [`ServerMessage`] union; tags the
//! client does not know are kept as [`ServerMessage::Unhandled`].

use crate::error::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Command tags understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    // Session
    Login,
    Register,
    UserInfo,
    Logout,

    // Projects
    ProjectList,
    FileTree,
    CreateProject,
    DeleteProject,

    // Sharing
    SharedList,
    AddShare,
    DeleteShare,

    // Files
    AddFile,
    AddFolder,
}

impl CommandTag {
    pub fn code(&self) -> u32 {
        match self {
            CommandTag::Login => 1,
            CommandTag::Register => 2,
            CommandTag::UserInfo => 3,
            CommandTag::Logout => 4,
            CommandTag::ProjectList => 10,
            CommandTag::FileTree => 11,
            CommandTag::CreateProject => 12,
            CommandTag::DeleteProject => 13,
            CommandTag::SharedList => 20,
            CommandTag::AddShare => 21,
            CommandTag::DeleteShare => 22,
            CommandTag::AddFile => 30,
            CommandTag::AddFolder => 31,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => CommandTag::Login,
            2 => CommandTag::Register,
            3 => CommandTag::UserInfo,
            4 => CommandTag::Logout,
            10 => CommandTag::ProjectList,
            11 => CommandTag::FileTree,
            12 => CommandTag::CreateProject,
            13 => CommandTag::DeleteProject,
            20 => CommandTag::SharedList,
            21 => CommandTag::AddShare,
            22 => CommandTag::DeleteShare,
            30 => CommandTag::AddFile,
            31 => CommandTag::AddFolder,
            _ => return None,
        })
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommandTag::Login => "LOGIN",
            CommandTag::Register => "REGISTER",
            CommandTag::UserInfo => "USER_INFO",
            CommandTag::Logout => "LOGOUT",
            CommandTag::ProjectList => "PROJECT_LIST",
            CommandTag::FileTree => "FILE_TREE",
            CommandTag::CreateProject => "CREATE_PROJECT",
            CommandTag::DeleteProject => "DELETE_PROJECT",
            CommandTag::SharedList => "SHARED_LIST",
            CommandTag::AddShare => "ADD_SHARE",
            CommandTag::DeleteShare => "DELETE_SHARE",
            CommandTag::AddFile => "ADD_FILE",
            CommandTag::AddFolder => "ADD_FOLDER",
        };
        f.write_str(name)
    }
}

/// Correlation id generated at submission time and echoed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// =========================================================================
// Requests
// =========================================================================

/// LOGIN and REGISTER request body.
#[derive(Debug, Serialize)]
pub struct CredentialsRequest<'a> {
    pub identifier: &'a str,
    pub secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<&'a str>,
}

/// Request body naming a single project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRequest {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

/// ADD_SHARE and DELETE_SHARE request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareRequest {
    pub project_id: String,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// ADD_FILE and ADD_FOLDER request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRequest {
    pub project_id: String,
    pub path: String,
}

// =========================================================================
// Responses
// =========================================================================

/// LOGIN and REGISTER result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub identifier: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: String,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectList {
    #[serde(default)]
    pub projects: Vec<ProjectSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    pub project_id: String,
    #[serde(default)]
    pub entries: Vec<FileEntry>,
}

/// CREATE_PROJECT and DELETE_PROJECT result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectResult {
    pub success: bool,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedList {
    pub project_id: String,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// ADD_SHARE and DELETE_SHARE result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareResult {
    pub project_id: String,
    pub success: bool,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
}

/// ADD_FILE and ADD_FOLDER result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub project_id: String,
    pub path: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// A decoded server response or push.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    LoginResult(AuthResult),
    RegisterResult(AuthResult),
    UserInfo(UserInfo),
    ProjectList(ProjectList),
    FileTree(FileTree),
    ProjectCreated(ProjectResult),
    ProjectDeleted(ProjectResult),
    SharedList(SharedList),
    ShareAdded(ShareResult),
    ShareDeleted(ShareResult),
    FileAdded(FileResult),
    FolderAdded(FileResult),
    /// A tag this client does not route.
    Unhandled { tag: u32, payload: Bytes },
}

/// Correlation data carried by responses that share a tag across requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Correlation<'a> {
    pub request_id: Option<RequestId>,
    pub project_id: &'a str,
}

impl ServerMessage {
    /// Decodes a response payload for the given command tag.
    pub fn decode(tag: u32, payload: &[u8]) -> Result<Self, ProtocolError> {
        let Some(command) = CommandTag::from_code(tag) else {
            return Ok(ServerMessage::Unhandled {
                tag,
                payload: Bytes::copy_from_slice(payload),
            });
        };

        let message = match command {
            CommandTag::Login => ServerMessage::LoginResult(serde_json::from_slice(payload)?),
            CommandTag::Register => ServerMessage::RegisterResult(serde_json::from_slice(payload)?),
            CommandTag::UserInfo => ServerMessage::UserInfo(serde_json::from_slice(payload)?),
            CommandTag::ProjectList => ServerMessage::ProjectList(serde_json::from_slice(payload)?),
            CommandTag::FileTree => ServerMessage::FileTree(serde_json::from_slice(payload)?),
            CommandTag::CreateProject => {
                ServerMessage::ProjectCreated(serde_json::from_slice(payload)?)
            }
            CommandTag::DeleteProject => {
                ServerMessage::ProjectDeleted(serde_json::from_slice(payload)?)
            }
            CommandTag::SharedList => ServerMessage::SharedList(serde_json::from_slice(payload)?),
            CommandTag::AddShare => ServerMessage::ShareAdded(serde_json::from_slice(payload)?),
            CommandTag::DeleteShare => ServerMessage::ShareDeleted(serde_json::from_slice(payload)?),
            CommandTag::AddFile => ServerMessage::FileAdded(serde_json::from_slice(payload)?),
            CommandTag::AddFolder => ServerMessage::FolderAdded(serde_json::from_slice(payload)?),
            CommandTag::Logout => ServerMessage::Unhandled {
                tag,
                payload: Bytes::copy_from_slice(payload),
            },
        };

        Ok(message)
    }

    /// Returns the wire tag this message arrived with.
    pub fn command_tag(&self) -> u32 {
        match self {
            ServerMessage::LoginResult(_) => CommandTag::Login.code(),
            ServerMessage::RegisterResult(_) => CommandTag::Register.code(),
            ServerMessage::UserInfo(_) => CommandTag::UserInfo.code(),
            ServerMessage::ProjectList(_) => CommandTag::ProjectList.code(),
            ServerMessage::FileTree(_) => CommandTag::FileTree.code(),
            ServerMessage::ProjectCreated(_) => CommandTag::CreateProject.code(),
            ServerMessage::ProjectDeleted(_) => CommandTag::DeleteProject.code(),
            ServerMessage::SharedList(_) => CommandTag::SharedList.code(),
            ServerMessage::ShareAdded(_) => CommandTag::AddShare.code(),
            ServerMessage::ShareDeleted(_) => CommandTag::DeleteShare.code(),
            ServerMessage::FileAdded(_) => CommandTag::AddFile.code(),
            ServerMessage::FolderAdded(_) => CommandTag::AddFolder.code(),
            ServerMessage::Unhandled { tag, .. } => *tag,
        }
    }

    /// Returns correlation data for responses routed to one-shot replies.
    ///
    /// Only SHARED_LIST and ADD_SHARE responses are correlated; every other
    /// message goes to the fixed event stream.
    pub fn correlation(&self) -> Option<Correlation<'_>> {
        match self {
            ServerMessage::SharedList(list) => Some(Correlation {
                request_id: list.request_id,
                project_id: &list.project_id,
            }),
            ServerMessage::ShareAdded(result) => Some(Correlation {
                request_id: result.request_id,
                project_id: &result.project_id,
            }),
            _ => None,
        }
    }
}
