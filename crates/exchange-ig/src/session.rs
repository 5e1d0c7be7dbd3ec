//! Session credential state shared by all requests and the heartbeat.
//!
//! There is exactly one token pair per client. Every replacement bumps a
//! generation counter so a caller that saw an auth failure can tell whether
//! someone else already re-authenticated while it was waiting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};

use crate::types::OAuthToken;

/// Heartbeat cadence used when no token lifetime is known.
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);

/// Shortest heartbeat cadence.
const MIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// Whether the client currently holds a token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// Access/refresh token pair plus the account they are bound to.
pub struct SessionTokens {
    access_token: SecretString,
    refresh_token: SecretString,
    lifetime: Duration,
    account_id: String,
}

impl SessionTokens {
    pub fn new(token: OAuthToken, account_id: impl Into<String>) -> Self {
        let lifetime = Duration::from_secs(token.lifetime_secs());
        Self {
            access_token: SecretString::from(token.access_token),
            refresh_token: SecretString::from(token.refresh_token),
            lifetime,
            account_id: account_id.into(),
        }
    }
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("lifetime", &self.lifetime)
            .field("account_id", &self.account_id)
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct SessionStore {
    tokens: RwLock<Option<SessionTokens>>,
    generation: AtomicU64,
}

impl SessionStore {
    pub fn install(&self, tokens: SessionTokens) {
        *self.tokens.write() = Some(tokens);
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Swaps in a refreshed token pair, keeping the bound account.
    pub fn refresh(&self, token: OAuthToken) -> bool {
        let mut guard = self.tokens.write();
        let Some(current) = guard.as_mut() else {
            return false;
        };
        let account_id = std::mem::take(&mut current.account_id);
        *current = SessionTokens::new(token, account_id);
        drop(guard);
        self.generation.fetch_add(1, Ordering::SeqCst);
        true
    }

    pub fn clear(&self) {
        *self.tokens.write() = None;
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        if self.tokens.read().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Bearer token and account header values for the next request.
    pub fn bearer(&self) -> Option<(String, String)> {
        self.tokens.read().as_ref().map(|t| {
            (
                t.access_token.expose_secret().to_string(),
                t.account_id.clone(),
            )
        })
    }

    pub fn refresh_token(&self) -> Option<SecretString> {
        self.tokens.read().as_ref().map(|t| t.refresh_token.clone())
    }

    pub fn account_id(&self) -> Option<String> {
        self.tokens.read().as_ref().map(|t| t.account_id.clone())
    }

    pub fn set_account(&self, account_id: &str) {
        if let Some(tokens) = self.tokens.write().as_mut() {
            tokens.account_id = account_id.to_string();
        }
    }

    /// Half the advertised token lifetime.
    pub fn heartbeat_interval(&self) -> Duration {
        self.tokens
            .read()
            .as_ref()
            .map_or(DEFAULT_HEARTBEAT, |t| (t.lifetime / 2).max(MIN_HEARTBEAT))
    }
}
