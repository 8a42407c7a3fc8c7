//! Session cache.
//!
//! Holds the credentials of the last login so the session can be
//! re-established after a reconnect. The secret lives in zeroizing storage
//! and every caller-supplied secret buffer is wiped before `store` returns.

use crate::dispatch::OutboundRequest;
use colink_protocol::message::CredentialsRequest;
use colink_protocol::{CommandTag, ProtocolError};
use zeroize::{Zeroize, Zeroizing};

/// Cached login credentials.
pub struct Credentials {
    identifier: String,
    secret: Zeroizing<Vec<u8>>,
}

impl Credentials {
    /// Copies `secret` and wipes the caller's buffer.
    ///
    /// The buffer is wiped even when the secret is rejected.
    pub fn take_from(identifier: &str, secret: &mut [u8]) -> Result<Self, ProtocolError> {
        let copy = Zeroizing::new(secret.to_vec());
        secret.zeroize();

        if std::str::from_utf8(&copy).is_err() {
            return Err(ProtocolError::InvalidUtf8);
        }

        Ok(Self {
            identifier: identifier.to_string(),
            secret: copy,
        })
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Builds the LOGIN request for these credentials.
    pub fn login_request(&self) -> Result<OutboundRequest, ProtocolError> {
        self.request(CommandTag::Login, None)
    }

    /// Builds a REGISTER request for these credentials.
    pub fn register_request(&self, email: Option<&str>) -> Result<OutboundRequest, ProtocolError> {
        self.request(CommandTag::Register, email)
    }

    fn request(
        &self,
        tag: CommandTag,
        email: Option<&str>,
    ) -> Result<OutboundRequest, ProtocolError> {
        let secret = std::str::from_utf8(&self.secret).map_err(|_| ProtocolError::InvalidUtf8)?;
        let body = CredentialsRequest {
            identifier: &self.identifier,
            secret,
            email,
        };
        Ok(OutboundRequest::json(tag, &body)?.sensitive())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Credentials of the current session, shared between the application and
/// the reconnection task.
#[derive(Default)]
pub struct SessionCache {
    credentials: parking_lot::Mutex<Option<Credentials>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached credentials and returns the LOGIN request to send.
    pub fn store(
        &self,
        identifier: &str,
        secret: &mut [u8],
    ) -> Result<OutboundRequest, ProtocolError> {
        let credentials = Credentials::take_from(identifier, secret)?;
        let request = credentials.login_request()?;
        *self.credentials.lock() = Some(credentials);
        Ok(request)
    }

    /// Wipes the cached credentials.
    pub fn clear(&self) {
        if let Some(credentials) = self.credentials.lock().take() {
            tracing::debug!("clearing cached session for {}", credentials.identifier);
        }
    }

    /// Builds a LOGIN request from the cache, if a session is cached.
    pub fn replay_request(&self) -> Option<OutboundRequest> {
        let guard = self.credentials.lock();
        let credentials = guard.as_ref()?;
        match credentials.login_request() {
            Ok(request) => Some(request),
            Err(e) => {
                tracing::warn!("cannot replay session for {}: {}", credentials.identifier, e);
                None
            }
        }
    }

    pub fn identifier(&self) -> Option<String> {
        self.credentials
            .lock()
            .as_ref()
            .map(|c| c.identifier.clone())
    }

    pub fn is_cached(&self) -> bool {
        self.credentials.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_store_wipes_caller_secret() {
        let cache = SessionCache::new();
        let mut secret = b"correct horse".to_vec();

        let request = cache.store("ann", &mut secret).unwrap();

        assert_ne!(secret, b"correct horse");
        assert!(secret.iter().all(|b| *b == 0));
        assert_eq!(secret.len(), 13);
        assert!(request.is_sensitive());
        assert_eq!(request.command_tag(), CommandTag::Login.code());
    }

    #[test]
    fn test_invalid_secret_still_wiped() {
        let cache = SessionCache::new();
        let mut secret = vec![0xff, 0xfe, 0x41];

        let err = cache.store("ann", &mut secret).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidUtf8));
        assert_eq!(secret, vec![0, 0, 0]);
        assert!(!cache.is_cached());
    }

    #[test]
    fn test_replay_builds_login_from_cache() {
        let cache = SessionCache::new();
        assert!(cache.replay_request().is_none());

        let mut secret = b"s3cret".to_vec();
        cache.store("ann", &mut secret).unwrap();

        let replay = cache.replay_request().unwrap();
        let body: Value = serde_json::from_slice(replay.payload()).unwrap();
        assert_eq!(body["identifier"], "ann");
        assert_eq!(body["secret"], "s3cret");
        assert_eq!(cache.identifier().as_deref(), Some("ann"));
    }

    #[test]
    fn test_new_login_replaces_cache() {
        let cache = SessionCache::new();
        cache.store("ann", &mut b"one".to_vec()).unwrap();
        cache.store("bob", &mut b"two".to_vec()).unwrap();

        let body: Value =
            serde_json::from_slice(cache.replay_request().unwrap().payload()).unwrap();
        assert_eq!(body["identifier"], "bob");
        assert_eq!(body["secret"], "two");
    }

    #[test]
    fn test_clear_forgets_session() {
        let cache = SessionCache::new();
        cache.store("ann", &mut b"pw".to_vec()).unwrap();
        cache.clear();

        assert!(!cache.is_cached());
        assert!(cache.replay_request().is_none());
        assert!(cache.identifier().is_none());
    }

    #[test]
    fn test_register_request_includes_email() {
        let credentials = Credentials::take_from("ann", &mut b"pw".to_vec()).unwrap();
        let request = credentials.register_request(Some("ann@example.com")).unwrap();

        assert_eq!(request.command_tag(), CommandTag::Register.code());
        let body: Value = serde_json::from_slice(request.payload()).unwrap();
        assert_eq!(body["email"], "ann@example.com");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let credentials = Credentials::take_from("ann", &mut b"hunter2".to_vec()).unwrap();
        let debug = format!("{:?}", credentials);
        assert!(debug.contains("ann"));
        assert!(!debug.contains("hunter2"));
    }
}
