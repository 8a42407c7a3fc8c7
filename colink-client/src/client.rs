//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, ConnectionState};
use crate::dispatch::OutboundRequest;
use crate::error::ClientError;
use crate::router::SessionEvent;
use colink_protocol::message::*;
use colink_protocol::{FrameCodec, PayloadType};
use serde::Serialize;
use serde_json::json;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

/// Typed view of a correlated response.
pub trait Reply: Sized {
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage>;
}

impl Reply for SharedList {
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage> {
        match message {
            ServerMessage::SharedList(list) => Ok(list),
            other => Err(other),
        }
    }
}

impl Reply for ShareResult {
    fn from_message(message: ServerMessage) -> Result<Self, ServerMessage> {
        match message {
            ServerMessage::ShareAdded(result) => Ok(result),
            other => Err(other),
        }
    }
}

/// A one-shot reply to a correlated request.
///
/// Dropping it without waiting leaves the registration in place until a
/// matching response arrives or the client shuts down.
pub struct PendingReply<T> {
    id: RequestId,
    rx: oneshot::Receiver<ServerMessage>,
    conn: Connection,
    timeout: Option<Duration>,
    _reply: PhantomData<fn() -> T>,
}

impl<T: Reply> PendingReply<T> {
    pub fn request_id(&self) -> RequestId {
        self.id
    }

    /// Waits for the response, bounded by the configured request timeout.
    pub async fn wait(self) -> Result<T, ClientError> {
        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.conn.router().cancel(&self.id);
                    return Err(ClientError::Timeout);
                }
            },
            None => self.rx.await,
        };

        let message = received.map_err(|_| ClientError::ConnectionClosed)?;
        T::from_message(message).map_err(|other| ClientError::UnexpectedReply {
            tag: other.command_tag(),
        })
    }
}

/// High-level client for a collaboration server.
///
/// Every operation is fire-and-forget: it queues a request and returns.
/// Responses arrive as [`SessionEvent::Message`] on [`Client::subscribe`],
/// except SHARED_LIST and ADD_SHARE, which resolve a [`PendingReply`].
#[derive(Clone)]
pub struct Client {
    conn: Connection,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Connection::new(config),
        }
    }

    /// Creates a new client with a custom frame codec.
    pub fn with_codec(config: ConnectionConfig, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            conn: Connection::with_codec(config, codec),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Closes the connection and cancels any reconnection in progress.
    pub async fn disconnect(&self) {
        self.conn.disconnect().await
    }

    /// Disconnects and stops the dispatcher. Later requests fail with
    /// [`ClientError::Shutdown`].
    pub async fn shutdown(&self) {
        self.conn.shutdown().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.conn.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.conn.subscribe_state()
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Queues a raw payload.
    pub fn submit(
        &self,
        payload: Vec<u8>,
        fragment: bool,
        command_tag: u32,
        payload_type: PayloadType,
    ) -> Result<(), ClientError> {
        let request =
            OutboundRequest::new(command_tag, payload_type, payload).with_fragment(fragment);
        self.conn.submit(request)
    }

    fn send<T: Serialize>(&self, tag: CommandTag, body: &T) -> Result<(), ClientError> {
        self.conn.submit(OutboundRequest::json(tag, body)?)
    }

    fn correlated<T: Reply>(
        &self,
        tag: CommandTag,
        project_id: &str,
        build: impl FnOnce(RequestId) -> Result<OutboundRequest, ClientError>,
    ) -> Result<PendingReply<T>, ClientError> {
        let (id, rx) = self.conn.router().register(tag, project_id);
        if let Err(e) = build(id).and_then(|request| self.conn.submit(request)) {
            self.conn.router().cancel(&id);
            return Err(e);
        }

        Ok(PendingReply {
            id,
            rx,
            conn: self.conn.clone(),
            timeout: self.conn.config().request_timeout,
            _reply: PhantomData,
        })
    }

    // =========================================================================
    // Session operations
    // =========================================================================

    /// Logs in and caches the credentials for replay after a reconnect.
    ///
    /// `secret` is zeroized before this returns, whether or not it succeeds.
    pub fn login(&self, identifier: &str, secret: &mut [u8]) -> Result<(), ClientError> {
        let request = self.conn.session().store(identifier, secret)?;
        tracing::debug!("queueing login for {}", identifier);
        self.conn.submit(request)
    }

    /// Forgets the cached session and tells the server.
    pub fn logout(&self) -> Result<(), ClientError> {
        self.conn.session().clear();
        self.send(CommandTag::Logout, &json!({}))
    }

    /// Registers a new account. The credentials are not cached.
    pub fn register(
        &self,
        identifier: &str,
        secret: &mut [u8],
        email: Option<&str>,
    ) -> Result<(), ClientError> {
        let credentials = crate::session::Credentials::take_from(identifier, secret)?;
        self.conn.submit(credentials.register_request(email)?)
    }

    pub fn request_user_info(&self) -> Result<(), ClientError> {
        self.send(CommandTag::UserInfo, &json!({}))
    }

    // =========================================================================
    // Project operations
    // =========================================================================

    pub fn list_projects(&self) -> Result<(), ClientError> {
        self.send(CommandTag::ProjectList, &json!({}))
    }

    /// Requests the file tree of a project.
    pub fn list_files(&self, project_id: &str) -> Result<(), ClientError> {
        self.send(CommandTag::FileTree, &project_request(project_id, None))
    }

    pub fn create_project(&self, name: &str) -> Result<(), ClientError> {
        let body = CreateProjectRequest {
            name: name.to_string(),
        };
        self.send(CommandTag::CreateProject, &body)
    }

    pub fn delete_project(&self, project_id: &str) -> Result<(), ClientError> {
        self.send(CommandTag::DeleteProject, &project_request(project_id, None))
    }

    pub fn add_file(&self, project_id: &str, path: &str) -> Result<(), ClientError> {
        self.send(CommandTag::AddFile, &path_request(project_id, path))
    }

    pub fn add_folder(&self, project_id: &str, path: &str) -> Result<(), ClientError> {
        self.send(CommandTag::AddFolder, &path_request(project_id, path))
    }

    // =========================================================================
    // Sharing operations
    // =========================================================================

    /// Requests the users a project is shared with.
    pub fn shared_list(&self, project_id: &str) -> Result<PendingReply<SharedList>, ClientError> {
        self.correlated(CommandTag::SharedList, project_id, |id| {
            let body = project_request(project_id, Some(id));
            Ok(OutboundRequest::json(CommandTag::SharedList, &body)?)
        })
    }

    /// Shares a project with another user.
    pub fn add_share(
        &self,
        project_id: &str,
        user: &str,
    ) -> Result<PendingReply<ShareResult>, ClientError> {
        self.correlated(CommandTag::AddShare, project_id, |id| {
            let body = share_request(project_id, user, Some(id));
            Ok(OutboundRequest::json(CommandTag::AddShare, &body)?)
        })
    }

    /// Revokes a share. The result arrives as a session event.
    pub fn delete_share(&self, project_id: &str, user: &str) -> Result<(), ClientError> {
        self.send(
            CommandTag::DeleteShare,
            &share_request(project_id, user, None),
        )
    }
}

fn project_request(project_id: &str, request_id: Option<RequestId>) -> ProjectRequest {
    ProjectRequest {
        project_id: project_id.to_string(),
        request_id,
    }
}

fn share_request(project_id: &str, user: &str, request_id: Option<RequestId>) -> ShareRequest {
    ShareRequest {
        project_id: project_id.to_string(),
        user: user.to_string(),
        request_id,
    }
}

fn path_request(project_id: &str, path: &str) -> PathRequest {
    PathRequest {
        project_id: project_id.to_string(),
        path: path.to_string(),
    }
}
