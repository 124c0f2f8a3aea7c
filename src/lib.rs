//! # Trivia Server
//!
//! Multi-client trivia game over a fixed-width text protocol.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        TRIVIA SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                        │
//! │  └── rng.rs      - Seeded Xorshift128+ PRNG                 │
//! │                                                             │
//! │  game/           - Game data                                │
//! │  ├── users.rs    - User table, scores, asked questions      │
//! │  └── questions.rs- Question bank, file and web loaders      │
//! │                                                             │
//! │  network/        - Protocol and endpoints                   │
//! │  ├── protocol.rs - Command vocabulary, wire constants       │
//! │  ├── validate.rs - Single-rule field checks                 │
//! │  ├── codec.rs    - Frame encode/decode, stream framing      │
//! │  ├── auth.rs     - Credential check                         │
//! │  ├── session.rs  - Per-command handlers, ServerContext      │
//! │  ├── server.rs   - mio connection multiplexer               │
//! │  └── client.rs   - tokio client                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//!
//! `CMD(16, space padded)|LEN(4 digits)|PAYLOAD`, payload records split by
//! `#`. See [`network::protocol`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::core::rng::DeterministicRng;
pub use game::{Question, QuestionBank, StoreError, User, UserStore};
pub use network::{Command, Message, ServerConfig, ServerContext, TriviaClient, TriviaServer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
