//! Trivia Client
//!
//! Async client for the trivia protocol. One request, one reply: every
//! method sends a frame and waits for the matching server command.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::network::codec::{encode_message, join_fields, next_frame, split_fields, CodecError};
use crate::network::protocol::{Command, Message};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address.
    pub server_addr: SocketAddr,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 5678)),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables (`TRIVIA_SERVER_ADDR`).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            server_addr: std::env::var("TRIVIA_SERVER_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_addr),
        }
    }
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be built or parsed.
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),

    /// Server closed the connection.
    #[error("server closed the connection")]
    ConnectionClosed,

    /// Server answered with an unexpected command.
    #[error("expected {expected}, got {got}")]
    UnexpectedReply {
        /// Command the request expects.
        expected: &'static str,
        /// Command received.
        got: Command,
    },

    /// Server answered `ERROR`.
    #[error("server error: {0}")]
    Server(String),

    /// Reply payload is not in the expected shape.
    #[error("invalid reply payload: {0:?}")]
    InvalidPayload(String),
}

/// A question as shown to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionPrompt {
    /// Question id, echoed back with the answer.
    pub id: String,
    /// Question text.
    pub text: String,
    /// The four answers.
    pub answers: [String; 4],
}

impl QuestionPrompt {
    /// Parse a `YOUR_QUESTION` payload.
    pub fn parse(payload: &str) -> Result<Self, CodecError> {
        let fields = split_fields(payload, 5)?;
        Ok(Self {
            id: fields[0].to_string(),
            text: fields[1].to_string(),
            answers: [
                fields[2].to_string(),
                fields[3].to_string(),
                fields[4].to_string(),
                fields[5].to_string(),
            ],
        })
    }
}

/// Result of `SEND_ANSWER`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Right answer, score increased.
    Correct,
    /// Wrong answer; carries the right index.
    Wrong {
        /// 1-based index of the right answer.
        correct: String,
    },
}

/// Connected trivia client.
pub struct TriviaClient {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TriviaClient {
    /// Connect to a server.
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        debug!("Connected to {}", addr);
        Ok(Self {
            stream,
            buffer: Vec::new(),
        })
    }

    /// Send one message.
    pub async fn send(&mut self, message: &Message) -> Result<(), ClientError> {
        let frame = encode_message(message)?;
        debug!("-> {}", frame);
        self.stream.write_all(frame.as_bytes()).await?;
        Ok(())
    }

    /// Wait for the next message.
    pub async fn recv(&mut self) -> Result<Message, ClientError> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(message) = next_frame(&mut self.buffer)? {
                debug!("<- {} {:?}", message.command, message.payload);
                return Ok(message);
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Send a request and wait for its reply. `ERROR` replies become
    /// [`ClientError::Server`].
    pub async fn request(&mut self, command: Command, payload: &str) -> Result<Message, ClientError> {
        self.send(&Message::new(command, payload)).await?;
        let reply = self.recv().await?;
        if reply.command == Command::Error {
            return Err(ClientError::Server(reply.payload));
        }
        Ok(reply)
    }

    /// Log in.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<(), ClientError> {
        let payload = join_fields(&[username, password])?;
        let reply = self.request(Command::Login, &payload).await?;
        expect_command(&reply, Command::LoginOk)
    }

    /// Log out. The server closes the connection without replying.
    pub async fn logout(mut self) -> Result<(), ClientError> {
        self.send(&Message::empty(Command::Logout)).await?;
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Own score.
    pub async fn my_score(&mut self) -> Result<u32, ClientError> {
        let reply = self.request(Command::MyScore, "").await?;
        expect_command(&reply, Command::YourScore)?;
        reply
            .payload
            .parse()
            .map_err(|_| ClientError::InvalidPayload(reply.payload.clone()))
    }

    /// Score table, one `username: score` line per user.
    pub async fn highscore(&mut self) -> Result<String, ClientError> {
        let reply = self.request(Command::Highscore, "").await?;
        expect_command(&reply, Command::AllScore)?;
        Ok(reply.payload)
    }

    /// Usernames currently logged in.
    pub async fn logged_users(&mut self) -> Result<Vec<String>, ClientError> {
        let reply = self.request(Command::Logged, "").await?;
        expect_command(&reply, Command::LoggedAnswer)?;
        if reply.payload.is_empty() {
            return Ok(Vec::new());
        }
        Ok(reply.payload.split(", ").map(str::to_string).collect())
    }

    /// Next unasked question, or `None` when all were asked.
    pub async fn get_question(&mut self) -> Result<Option<QuestionPrompt>, ClientError> {
        let reply = self.request(Command::GetQuestion, "").await?;
        match reply.command {
            Command::NoQuestions => Ok(None),
            Command::YourQuestion => Ok(Some(QuestionPrompt::parse(&reply.payload)?)),
            got => Err(ClientError::UnexpectedReply {
                expected: Command::YourQuestion.as_str(),
                got,
            }),
        }
    }

    /// Answer a question with a 1-based answer index.
    pub async fn send_answer(&mut self, question_id: &str, answer: &str) -> Result<AnswerOutcome, ClientError> {
        let payload = join_fields(&[question_id, answer])?;
        let reply = self.request(Command::SendAnswer, &payload).await?;
        match reply.command {
            Command::CorrectAnswer => Ok(AnswerOutcome::Correct),
            Command::WrongAnswer => Ok(AnswerOutcome::Wrong {
                correct: reply.payload,
            }),
            got => Err(ClientError::UnexpectedReply {
                expected: Command::CorrectAnswer.as_str(),
                got,
            }),
        }
    }
}

fn expect_command(reply: &Message, expected: Command) -> Result<(), ClientError> {
    if reply.command != expected {
        return Err(ClientError::UnexpectedReply {
            expected: expected.as_str(),
            got: reply.command,
        });
    }
    Ok(())
}
