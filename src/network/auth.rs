//! Password Authentication
//!
//! Checks `LOGIN` credentials against the user store. Passwords are stored
//! and compared in plaintext.

use thiserror::Error;

use crate::game::users::{User, UserStore};
use crate::network::codec::{split_fields, CodecError};

/// Login credentials from a `LOGIN` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Claimed username.
    pub username: String,
    /// Claimed password.
    pub password: String,
}

impl Credentials {
    /// Parse `username#password`.
    pub fn parse(payload: &str) -> Result<Self, CodecError> {
        let fields = split_fields(payload, 1)?;
        Ok(Self {
            username: fields[0].to_string(),
            password: fields[1].to_string(),
        })
    }
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No such user.
    #[error("username {0} does not exist")]
    UnknownUser(String),
    /// Password does not match.
    #[error("wrong password for {0}")]
    WrongPassword(String),
}

/// Check credentials and return the matching user.
pub fn authenticate<'a>(users: &'a UserStore, credentials: &Credentials) -> Result<&'a User, AuthError> {
    let user = users
        .lookup(&credentials.username)
        .ok_or_else(|| AuthError::UnknownUser(credentials.username.clone()))?;

    if user.password != credentials.password {
        return Err(AuthError::WrongPassword(credentials.username.clone()));
    }

    Ok(user)
}
