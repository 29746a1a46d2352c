//! Capability tokens: `user_id|expiry_unix_seconds|scope`.
//!
//! A token authorizes its bearer to perform one `Scope` of action until it
//! expires. Validation is pure and process-local: expiry and scope are
//! checked against the token text itself, and a revoked-token set is
//! consulted so `Controller::revoke` takes effect without waiting for
//! natural expiry.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Chat,
    Follow,
    Unfollow,
    Post,
    Like,
    File,
    Group,
    Game,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Chat => "chat",
            Scope::Follow => "follow",
            Scope::Unfollow => "unfollow",
            Scope::Post => "post",
            Scope::Like => "like",
            Scope::File => "file",
            Scope::Group => "group",
            Scope::Game => "game",
        }
    }

    pub fn parse(s: &str) -> Option<Scope> {
        match s {
            "chat" => Some(Scope::Chat),
            "follow" => Some(Scope::Follow),
            "unfollow" => Some(Scope::Unfollow),
            "post" => Some(Scope::Post),
            "like" => Some(Scope::Like),
            "file" => Some(Scope::File),
            "group" => Some(Scope::Group),
            "game" => Some(Scope::Game),
            _ => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug)]
pub enum TokenError {
    Malformed,
    Expired,
    ScopeMismatch,
    Revoked,
    UnknownScope(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Malformed => write!(f, "malformed token"),
            TokenError::Expired => write!(f, "token expired"),
            TokenError::ScopeMismatch => write!(f, "token scope does not match"),
            TokenError::Revoked => write!(f, "token has been revoked"),
            TokenError::UnknownScope(s) => write!(f, "unknown scope '{}'", s),
        }
    }
}

impl std::error::Error for TokenError {}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Issues a token good for `ttl_seconds` from now.
pub fn issue(user_id: &str, scope: Scope, ttl_seconds: u64) -> String {
    let expiry = now_unix() + ttl_seconds;
    format!("{}|{}|{}", user_id, expiry, scope.as_str())
}

/// Splits a token into its three fields without checking expiry or scope.
pub fn parse(token: &str) -> Result<(&str, u64, Scope), TokenError> {
    let mut parts = token.splitn(3, '|');
    let user_id = parts.next().ok_or(TokenError::Malformed)?;
    let expiry_str = parts.next().ok_or(TokenError::Malformed)?;
    let scope_str = parts.next().ok_or(TokenError::Malformed)?;
    if parts.next().is_some() {
        return Err(TokenError::Malformed);
    }
    let expiry: u64 = expiry_str.parse().map_err(|_| TokenError::Malformed)?;
    let scope = Scope::parse(scope_str).ok_or_else(|| TokenError::UnknownScope(scope_str.to_string()))?;
    Ok((user_id, expiry, scope))
}

/// Tracks process-local token revocation. Separate from peer/controller
/// state so it can be locked independently of the rest of the protocol
/// engine's mutexes.
#[derive(Default)]
pub struct RevocationSet {
    revoked: Mutex<HashSet<String>>,
}

impl RevocationSet {
    pub fn new() -> Self {
        RevocationSet::default()
    }

    pub fn revoke(&self, token: &str) {
        self.revoked.lock().unwrap().insert(token.to_string());
    }

    pub fn is_revoked(&self, token: &str) -> bool {
        self.revoked.lock().unwrap().contains(token)
    }

    /// Validates `token` against `required_scope`, checking revocation,
    /// expiry, and scope in that order.
    pub fn validate(&self, token: &str, required_scope: Scope) -> Result<String, TokenError> {
        if self.is_revoked(token) {
            return Err(TokenError::Revoked);
        }
        let (user_id, expiry, scope) = parse(token)?;
        if now_unix() > expiry {
            return Err(TokenError::Expired);
        }
        if scope != required_scope {
            return Err(TokenError::ScopeMismatch);
        }
        Ok(user_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_validates_for_its_scope() {
        let revoked = RevocationSet::new();
        let token = issue("alice@10.0.0.2", Scope::Post, 600);
        let user_id = revoked.validate(&token, Scope::Post).unwrap();
        assert_eq!(user_id, "alice@10.0.0.2");
    }

    #[test]
    fn scope_mismatch_is_rejected() {
        let revoked = RevocationSet::new();
        let token = issue("alice@10.0.0.2", Scope::Post, 600);
        assert!(matches!(
            revoked.validate(&token, Scope::Follow),
            Err(TokenError::ScopeMismatch)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let revoked = RevocationSet::new();
        let token = issue("alice@10.0.0.2", Scope::Chat, 0);
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(matches!(revoked.validate(&token, Scope::Chat), Err(TokenError::Expired)));
    }

    #[test]
    fn revoked_token_is_rejected_even_if_unexpired() {
        let revoked = RevocationSet::new();
        let token = issue("alice@10.0.0.2", Scope::Chat, 600);
        revoked.revoke(&token);
        assert!(matches!(revoked.validate(&token, Scope::Chat), Err(TokenError::Revoked)));
    }

    #[test]
    fn malformed_token_is_rejected() {
        let revoked = RevocationSet::new();
        assert!(matches!(revoked.validate("not-a-token", Scope::Chat), Err(TokenError::Malformed)));
    }
}
