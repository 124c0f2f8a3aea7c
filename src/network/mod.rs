//! Network Layer
//!
//! Wire protocol, session handlers and the two endpoints.
//! Only `server` and `client` do I/O; the rest is pure.

pub mod auth;
pub mod client;
pub mod codec;
pub mod protocol;
pub mod server;
pub mod session;
pub mod validate;

pub use auth::{authenticate, AuthError, Credentials};
pub use client::{AnswerOutcome, ClientConfig, ClientError, QuestionPrompt, TriviaClient};
pub use codec::{decode, encode, next_frame, split_fields, join_fields, CodecError};
pub use protocol::{Command, Message};
pub use server::{QuestionSource, ServerConfig, ServerError, ShutdownHandle, TriviaServer};
pub use session::{ConnectionId, HandlerError, ServerContext, SessionState};
