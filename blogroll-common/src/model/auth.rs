//! Session tokens handed out by the login subsystem.
//!
//! A token reads `{user_id}:{core}:{salt}` with the last two parts in
//! base64. Only the argon2 digest of the core is stored.

use crate::model::{Id, user::UserMarker};
use argon2::{Argon2, Params};
use base64::{DecodeError, Engine, display::Base64Display, prelude::BASE64_STANDARD};
use std::{
    fmt::{Debug, Display, Formatter},
    num::ParseIntError,
    str::FromStr,
};
use thiserror::Error;
use time::{Duration, UtcDateTime};

pub const SESSION_TOKEN_CORE_LEN: usize = 24;
pub const SESSION_TOKEN_SALT_LEN: usize = 18;
pub const AUTH_TOKEN_HASH_LEN: usize = Params::DEFAULT_OUTPUT_LEN;

#[derive(Clone, Eq, PartialEq, Debug, Error)]
#[error("Hashing session token failed: {0}")]
pub struct AuthTokenHashError(argon2::Error);

#[derive(Clone, Eq, PartialEq, Debug, Error)]
pub enum SessionTokenDecodeError {
    #[error("Not enough parts separated by ':'")]
    NotEnoughParts,
    #[error("Invalid user id: {0}")]
    InvalidUserId(ParseIntError),
    #[error("Decoding base64 failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("The core part has the wrong length")]
    InvalidCoreLength,
    #[error("The salt part has the wrong length")]
    InvalidSaltLength,
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct SessionToken {
    pub user_id: Id<UserMarker>,
    pub core: [u8; SESSION_TOKEN_CORE_LEN],
    pub salt: [u8; SESSION_TOKEN_SALT_LEN],
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct AuthTokenHash(pub Box<[u8; AUTH_TOKEN_HASH_LEN]>);

/// How long a session stays valid after it was issued.
#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Debug, Hash)]
pub struct SessionLifetime(Duration);

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
#[error("A session lifetime must be positive, got {0}")]
pub struct NonPositiveLifetimeError(Duration);

impl TryFrom<Duration> for SessionLifetime {
    type Error = NonPositiveLifetimeError;

    fn try_from(value: Duration) -> Result<Self, Self::Error> {
        if value.is_positive() {
            Ok(Self(value))
        } else {
            Err(NonPositiveLifetimeError(value))
        }
    }
}

impl SessionLifetime {
    #[must_use]
    pub fn get(self) -> Duration {
        self.0
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Authentication {
    pub user: Id<UserMarker>,
    pub token_hash: AuthTokenHash,
    pub created_at: UtcDateTime,
    pub expires_after: Option<SessionLifetime>,
}

impl Authentication {
    #[must_use]
    pub fn is_expired_at(&self, now: UtcDateTime) -> bool {
        self.expires_after
            .is_some_and(|lifetime| self.created_at + lifetime.get() < now)
    }
}

impl SessionToken {
    #[must_use]
    pub fn generate(user_id: Id<UserMarker>) -> Self {
        Self {
            user_id,
            core: rand::random(),
            salt: rand::random(),
        }
    }

    pub fn digest(&self) -> Result<AuthTokenHash, AuthTokenHashError> {
        let mut hash = Box::new([0; AUTH_TOKEN_HASH_LEN]);
        Argon2::default()
            .hash_password_into(&self.core, &self.salt, &mut *hash)
            .map_err(AuthTokenHashError)?;

        Ok(AuthTokenHash(hash))
    }
}

impl Display for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.user_id,
            Base64Display::new(&self.core, &BASE64_STANDARD),
            Base64Display::new(&self.salt, &BASE64_STANDARD),
        )
    }
}

impl FromStr for SessionToken {
    type Err = SessionTokenDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(user_id), Some(core), Some(salt)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Self::Err::NotEnoughParts);
        };

        Ok(Self {
            user_id: user_id.parse().map_err(Self::Err::InvalidUserId)?,
            core: BASE64_STANDARD
                .decode(core)?
                .try_into()
                .map_err(|_| Self::Err::InvalidCoreLength)?,
            salt: BASE64_STANDARD
                .decode(salt)?
                .try_into()
                .map_err(|_| Self::Err::InvalidSaltLength)?,
        })
    }
}

impl Debug for SessionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl Debug for AuthTokenHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AuthTokenHash").field(&"[redacted]").finish()
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The session token hash had an invalid length")]
pub struct InvalidAuthTokenHashError;

impl TryFrom<Vec<u8>> for AuthTokenHash {
    type Error = InvalidAuthTokenHashError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let bytes: Box<[u8]> = value.into_boxed_slice();
        Ok(Self(bytes.try_into().map_err(|_| InvalidAuthTokenHashError)?))
    }
}
