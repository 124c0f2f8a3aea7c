//! Protocol Messages
//!
//! Command vocabulary and wire constants for the trivia protocol.
//!
//! A frame is three `|`-separated fields:
//!
//! ```text
//! LOGIN           |0009|aaaa#bbbb
//! └── 16 bytes ──┘ └4┘ └ payload ┘
//! ```
//!
//! The payload is further split into records by `#`.

use std::fmt;
use std::str::FromStr;

// =============================================================================
// WIRE CONSTANTS
// =============================================================================

/// Exact width of the command field (bytes).
pub const CMD_FIELD_LENGTH: usize = 16;

/// Exact width of the length field (bytes).
pub const LENGTH_FIELD_LENGTH: usize = 4;

/// Largest payload the length field can describe.
pub const MAX_DATA_LENGTH: usize = 9999;

/// Command field, delimiter, length field, delimiter.
pub const MSG_HEADER_LENGTH: usize = CMD_FIELD_LENGTH + 1 + LENGTH_FIELD_LENGTH + 1;

/// Largest complete frame.
pub const MAX_MSG_LENGTH: usize = MSG_HEADER_LENGTH + MAX_DATA_LENGTH;

/// Separates the three frame fields.
pub const DELIMITER: char = '|';

/// Separates records inside the payload.
pub const DATA_DELIMITER: char = '#';

/// Points awarded for a correct answer.
pub const CORRECT_ANSWER_REWARD: u32 = 5;

// =============================================================================
// COMMANDS
// =============================================================================

/// Every command name that may appear in the command field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // Client -> server
    /// `username#password`
    Login,
    /// Ends the session and closes the connection.
    Logout,
    /// Asks for the currently logged-in usernames.
    Logged,
    /// Asks for a question not yet asked to this user.
    GetQuestion,
    /// `questionId#answerIndex`
    SendAnswer,
    /// Asks for the caller's score.
    MyScore,
    /// Asks for the score table.
    Highscore,

    // Server -> client
    /// Login accepted.
    LoginOk,
    /// Comma-separated logged-in usernames.
    LoggedAnswer,
    /// `id#question#answer1#answer2#answer3#answer4`
    YourQuestion,
    /// The submitted answer was right.
    CorrectAnswer,
    /// The submitted answer was wrong; payload carries the right index.
    WrongAnswer,
    /// Caller's score as decimal.
    YourScore,
    /// One `username: score` line per user.
    AllScore,
    /// Human-readable failure.
    Error,
    /// Every question has been asked to this user.
    NoQuestions,
}

impl Command {
    /// All commands a client may send.
    pub const CLIENT: [Command; 7] = [
        Command::Login,
        Command::Logout,
        Command::Logged,
        Command::GetQuestion,
        Command::SendAnswer,
        Command::MyScore,
        Command::Highscore,
    ];

    /// All commands a server may send.
    pub const SERVER: [Command; 9] = [
        Command::LoginOk,
        Command::LoggedAnswer,
        Command::YourQuestion,
        Command::CorrectAnswer,
        Command::WrongAnswer,
        Command::YourScore,
        Command::AllScore,
        Command::Error,
        Command::NoQuestions,
    ];

    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Command::Login => "LOGIN",
            Command::Logout => "LOGOUT",
            Command::Logged => "LOGGED",
            Command::GetQuestion => "GET_QUESTION",
            Command::SendAnswer => "SEND_ANSWER",
            Command::MyScore => "MY_SCORE",
            Command::Highscore => "HIGHSCORE",
            Command::LoginOk => "LOGIN_OK",
            Command::LoggedAnswer => "LOGGED_ANSWER",
            Command::YourQuestion => "YOUR_QUESTION",
            Command::CorrectAnswer => "CORRECT_ANSWER",
            Command::WrongAnswer => "WRONG_ANSWER",
            Command::YourScore => "YOUR_SCORE",
            Command::AllScore => "ALL_SCORE",
            Command::Error => "ERROR",
            Command::NoQuestions => "NO_QUESTIONS",
        }
    }

    /// Look up a wire name in the client and server vocabularies.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::CLIENT
            .iter()
            .chain(Self::SERVER.iter())
            .copied()
            .find(|cmd| cmd.as_str() == name)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a name is outside the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("the provided command: {0}, does not exist")]
pub struct UnknownCommandName(pub String);

impl FromStr for Command {
    type Err = UnknownCommandName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_wire(s).ok_or_else(|| UnknownCommandName(s.to_string()))
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Command, padding removed.
    pub command: Command,
    /// Payload, verbatim.
    pub payload: String,
}

impl Message {
    /// Create a message.
    pub fn new(command: Command, payload: impl Into<String>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// Message with an empty payload.
    pub fn empty(command: Command) -> Self {
        Self::new(command, String::new())
    }
}
