//! Game Data Module
//!
//! Users and questions the trivia server plays with.
//!
//! ## Module Structure
//!
//! - `users`: user table with scores and asked-question sets
//! - `questions`: question bank, JSON file and web loaders

use std::path::PathBuf;

use thiserror::Error;

pub mod questions;
pub mod users;

pub use questions::{Question, QuestionBank, QuestionId};
pub use users::{User, UserStore};

/// Errors loading or saving game data.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// File content is not the expected JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A question breaks a structural rule.
    #[error("invalid question {id}: {reason}")]
    InvalidQuestion {
        /// Offending question.
        id: QuestionId,
        /// What is wrong with it.
        reason: String,
    },

    /// A user record breaks a structural rule.
    #[error("invalid user {username:?}: {reason}")]
    InvalidUser {
        /// Offending username.
        username: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// Two questions share an id.
    #[error("duplicate question id {0}")]
    DuplicateQuestion(QuestionId),

    /// Web request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Web API answered with a non-zero response code.
    #[error("question API returned response code {0}")]
    Api(u32),
}
