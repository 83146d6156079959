// src/sys/secrets.rs

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, Secret, SecretString};

/// Credentials expiring within this window are treated as already expired,
/// so an upload never starts with a key that dies halfway through.
pub const EXPIRY_SKEW_SECS: i64 = 300;

/// Storage credentials, either supplied directly or vended by the federation service.
///
/// 1. The secret key and session token cannot be accidentally logged
///    (`{:?}` prints `[REDACTED]`).
/// 2. They are zeroized when the struct goes out of scope.
#[derive(Clone, Debug)]
pub struct StorageCredentials {
    pub access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
    pub expiration: Option<DateTime<Utc>>,
}

impl StorageCredentials {
    /// Long-lived credentials with no session token and no expiration.
    pub fn fixed(access_key_id: impl Into<String>, secret_access_key: String) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Secret::new(secret_access_key),
            session_token: None,
            expiration: None,
        }
    }

    pub fn temporary(
        access_key_id: impl Into<String>,
        secret_access_key: String,
        session_token: String,
        expiration: DateTime<Utc>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: Secret::new(secret_access_key),
            session_token: Some(Secret::new(session_token)),
            expiration: Some(expiration),
        }
    }

    pub fn with_expiration(mut self, expiration: DateTime<Utc>) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn with_session_token(mut self, token: String) -> Self {
        self.session_token = Some(Secret::new(token));
        self
    }

    /// Exposes the secret key for the duration of `action` only.
    pub fn use_secret<F, R>(&self, action: F) -> R
    where
        F: FnOnce(&str) -> R,
    {
        action(self.secret_access_key.expose_secret())
    }

    pub fn use_session_token<F, R>(&self, action: F) -> R
    where
        F: FnOnce(Option<&str>) -> R,
    {
        action(self.session_token.as_ref().map(|t| t.expose_secret().as_str()))
    }

    /// Static credentials never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expiration {
            Some(exp) => exp - Duration::seconds(EXPIRY_SKEW_SECS) <= now,
            None => false,
        }
    }

    /// Compares key material without exposing it outside this module.
    #[cfg(test)]
    pub fn same_material(&self, other: &StorageCredentials) -> bool {
        self.access_key_id == other.access_key_id
            && self.secret_access_key.expose_secret() == other.secret_access_key.expose_secret()
            && self.session_token.as_ref().map(|t| t.expose_secret())
                == other.session_token.as_ref().map(|t| t.expose_secret())
            && self.expiration == other.expiration
    }
}
