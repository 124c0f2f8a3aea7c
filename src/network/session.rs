//! Session Handlers
//!
//! Per-command business logic for trivia connections. Every handler runs on
//! the [`ServerContext`] owned by the multiplexer; nothing here touches a
//! socket.
//!
//! ```text
//!            LOGIN ok                LOGOUT
//! Anonymous ─────────► Authenticated ───────► Closed
//! ```

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::rng::DeterministicRng;
use crate::game::questions::{QuestionBank, QuestionId};
use crate::game::users::UserStore;
use crate::network::auth::{authenticate, AuthError, Credentials};
use crate::network::codec::{join_fields, split_fields, CodecError};
use crate::network::protocol::{Command, Message, CORRECT_ANSWER_REWARD};

/// Prefix used on user-facing error texts.
pub const ERROR_PREFIX: &str = "Error! ";

// =============================================================================
// IDENTITY & STATE
// =============================================================================

/// Connection identity. Allocated once per accepted socket, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Session state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, not logged in.
    Anonymous,
    /// Logged in.
    Authenticated,
    /// Logged out; the connection must be closed.
    Closed,
}

/// Result of handling one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    /// Reply to queue, if any.
    pub reply: Option<Message>,
    /// State after the message.
    pub state: SessionState,
}

/// Handler errors. All of them become an `ERROR` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Command not allowed in the current state.
    #[error("command {0} not allowed in this state")]
    CommandNotRecognized(Command),

    /// Payload does not have the fields the command needs.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] CodecError),

    /// Credentials rejected.
    #[error("login failed: {0}")]
    Auth(#[from] AuthError),

    /// Answer for a question id that does not exist.
    #[error("no such question: {0}")]
    UnknownQuestion(String),

    /// Reply payload does not fit a frame.
    #[error("reply does not fit a frame: {0}")]
    ReplyTooLong(CodecError),
}

impl HandlerError {
    /// Text sent to the client. Login failures share one text.
    pub fn client_message(&self) -> String {
        match self {
            HandlerError::CommandNotRecognized(_) => "command is not recognized!".to_string(),
            HandlerError::MalformedPayload(_) => {
                "error occurred trying to understand your message!".to_string()
            }
            HandlerError::Auth(_) => format!("{}Username or password is incorrect!", ERROR_PREFIX),
            HandlerError::UnknownQuestion(_) => format!("{}No such question!", ERROR_PREFIX),
            HandlerError::ReplyTooLong(_) => format!("{}Reply is too long!", ERROR_PREFIX),
        }
    }

    /// `ERROR` message carrying [`HandlerError::client_message`].
    pub fn to_reply(&self) -> Message {
        Message::new(Command::Error, self.client_message())
    }
}

// =============================================================================
// SESSION TABLE
// =============================================================================

/// Logged-in connections, in login order.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    entries: Vec<(ConnectionId, String)>,
}

impl SessionTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a login. At most one session per connection.
    pub fn insert(&mut self, conn: ConnectionId, username: String) {
        self.remove(conn);
        self.entries.push((conn, username));
    }

    /// Drop a session, returning its username.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<String> {
        let pos = self.entries.iter().position(|(c, _)| *c == conn)?;
        Some(self.entries.remove(pos).1)
    }

    /// Username logged in on a connection.
    pub fn username(&self, conn: ConnectionId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == conn)
            .map(|(_, u)| u.as_str())
    }

    /// Usernames in login order.
    pub fn usernames(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, u)| u.as_str())
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True with no sessions.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// SERVER CONTEXT
// =============================================================================

/// All state shared by the handlers.
#[derive(Debug)]
pub struct ServerContext {
    /// User table.
    pub users: UserStore,
    /// Question bank.
    pub questions: QuestionBank,
    /// Logged-in connections.
    pub sessions: SessionTable,
    rng: DeterministicRng,
    users_path: Option<PathBuf>,
}

impl ServerContext {
    /// Context over loaded stores.
    pub fn new(users: UserStore, questions: QuestionBank, rng: DeterministicRng) -> Self {
        Self {
            users,
            questions,
            sessions: SessionTable::new(),
            rng,
            users_path: None,
        }
    }

    /// Write the user file after every score change.
    pub fn with_persistence(mut self, users_path: impl Into<PathBuf>) -> Self {
        self.users_path = Some(users_path.into());
        self
    }

    /// Current state of a connection.
    pub fn state_of(&self, conn: ConnectionId) -> SessionState {
        match self.sessions.username(conn) {
            Some(_) => SessionState::Authenticated,
            None => SessionState::Anonymous,
        }
    }

    /// Handle one decoded message from `conn`.
    pub fn handle(&mut self, conn: ConnectionId, message: &Message) -> HandlerOutcome {
        let state = self.state_of(conn);
        debug!("{} [{:?}] -> {} {:?}", conn, state, message.command, message.payload);

        let result = match (state, message.command) {
            (SessionState::Anonymous, Command::Login) => self.handle_login(conn, &message.payload),
            (SessionState::Authenticated, Command::Logout) => {
                self.handle_logout(conn);
                return HandlerOutcome {
                    reply: None,
                    state: SessionState::Closed,
                };
            }
            (SessionState::Authenticated, Command::MyScore) => Ok(self.handle_my_score(conn)),
            (SessionState::Authenticated, Command::Highscore) => Ok(self.handle_highscore()),
            (SessionState::Authenticated, Command::Logged) => Ok(self.handle_logged()),
            (SessionState::Authenticated, Command::GetQuestion) => self.handle_get_question(conn),
            (SessionState::Authenticated, Command::SendAnswer) => {
                self.handle_send_answer(conn, &message.payload)
            }
            (_, command) => Err(HandlerError::CommandNotRecognized(command)),
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) => {
                match &e {
                    HandlerError::Auth(reason) => warn!("{} login rejected: {}", conn, reason),
                    other => debug!("{} request rejected: {}", conn, other),
                }
                e.to_reply()
            }
        };

        HandlerOutcome {
            reply: Some(reply),
            state: self.state_of(conn),
        }
    }

    /// Forget a connection's session after a disconnect.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(username) = self.sessions.remove(conn) {
            info!("{} ({}) disconnected", conn, username);
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    fn handle_login(&mut self, conn: ConnectionId, payload: &str) -> Result<Message, HandlerError> {
        let credentials = Credentials::parse(payload)?;
        let user = authenticate(&self.users, &credentials)?;
        let username = user.username.clone();

        info!("{} logged in as {}", conn, username);
        self.sessions.insert(conn, username);
        Ok(Message::empty(Command::LoginOk))
    }

    fn handle_logout(&mut self, conn: ConnectionId) {
        if let Some(username) = self.sessions.remove(conn) {
            info!("{} ({}) logged out", conn, username);
        }
    }

    fn handle_my_score(&self, conn: ConnectionId) -> Message {
        let score = self
            .session_user(conn)
            .and_then(|name| self.users.lookup(name))
            .map(|user| user.score)
            .unwrap_or(0);
        Message::new(Command::YourScore, score.to_string())
    }

    fn handle_highscore(&self) -> Message {
        let table: String = self
            .users
            .ranking()
            .iter()
            .map(|user| format!("{}: {}\n", user.username, user.score))
            .collect();
        Message::new(Command::AllScore, table)
    }

    fn handle_logged(&self) -> Message {
        let names: Vec<&str> = self.sessions.usernames().collect();
        Message::new(Command::LoggedAnswer, names.join(", "))
    }

    fn handle_get_question(&mut self, conn: ConnectionId) -> Result<Message, HandlerError> {
        let Some(username) = self.session_user(conn).map(str::to_string) else {
            return Err(HandlerError::CommandNotRecognized(Command::GetQuestion));
        };
        let Some(user) = self.users.lookup_mut(&username) else {
            return Err(HandlerError::CommandNotRecognized(Command::GetQuestion));
        };

        let unasked: Vec<QuestionId> = self
            .questions
            .ids()
            .filter(|id| !user.questions_asked.contains(id))
            .collect();

        let Some(&id) = self.rng.choose(&unasked) else {
            debug!("{} has answered every question", username);
            return Ok(Message::empty(Command::NoQuestions));
        };

        let Some(question) = self.questions.get(id) else {
            return Ok(Message::empty(Command::NoQuestions));
        };
        let id_field = id.to_string();
        let mut fields = vec![id_field.as_str(), question.text.as_str()];
        fields.extend(question.answers.iter().map(String::as_str));
        let payload = join_fields(&fields).map_err(HandlerError::ReplyTooLong)?;

        user.questions_asked.insert(id);
        self.save_users();
        Ok(Message::new(Command::YourQuestion, payload))
    }

    fn handle_send_answer(&mut self, conn: ConnectionId, payload: &str) -> Result<Message, HandlerError> {
        let fields = split_fields(payload, 1)?;
        let (id_field, answer) = (fields[0], fields[1]);

        let question = id_field
            .parse::<QuestionId>()
            .ok()
            .and_then(|id| self.questions.get(id))
            .ok_or_else(|| HandlerError::UnknownQuestion(id_field.to_string()))?;
        let correct = question.correct.to_string();

        if answer != correct {
            return Ok(Message::new(Command::WrongAnswer, correct));
        }

        if let Some(username) = self.session_user(conn).map(str::to_string) {
            if let Some(score) = self.users.persist_score_delta(&username, CORRECT_ANSWER_REWARD) {
                debug!("{} scored, now {}", username, score);
            }
            self.save_users();
        }
        Ok(Message::empty(Command::CorrectAnswer))
    }

    fn session_user(&self, conn: ConnectionId) -> Option<&str> {
        self.sessions.username(conn)
    }

    fn save_users(&self) {
        let Some(path) = &self.users_path else {
            return;
        };
        if let Err(e) = self.users.save(path) {
            warn!("Failed to save users to {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::questions::Question;
    use crate::game::users::User;

    fn question(id: QuestionId, text: &str, correct: u8) -> Question {
        let answers = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        Question::new(id, text, answers, correct).unwrap()
    }

    fn context() -> ServerContext {
        let users = UserStore::from_users([
            User::new("test", "test"),
            User::new("yossi", "123").with_score(50),
            User::new("master", "master").with_score(200),
        ])
        .unwrap();
        let questions = QuestionBank::from_questions([
            question(2313, "How much is 2+2", 2),
            question(4122, "What is the capital of France?", 3),
        ])
        .unwrap();
        ServerContext::new(users, questions, DeterministicRng::new(12345))
    }

    fn send(ctx: &mut ServerContext, conn: ConnectionId, cmd: Command, payload: &str) -> HandlerOutcome {
        ctx.handle(conn, &Message::new(cmd, payload))
    }

    fn login(ctx: &mut ServerContext, conn: ConnectionId, creds: &str) {
        let outcome = send(ctx, conn, Command::Login, creds);
        assert_eq!(outcome.reply, Some(Message::empty(Command::LoginOk)));
    }

    #[test]
    fn test_anonymous_rejects_everything_but_login() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        for cmd in [Command::MyScore, Command::Logout, Command::GetQuestion, Command::LoginOk] {
            let outcome = send(&mut ctx, conn, cmd, "");
            assert_eq!(
                outcome.reply,
                Some(Message::new(Command::Error, "command is not recognized!"))
            );
            assert_eq!(outcome.state, SessionState::Anonymous);
        }
    }

    #[test]
    fn test_login_success() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");
        assert_eq!(ctx.state_of(conn), SessionState::Authenticated);
        assert_eq!(ctx.sessions.username(conn), Some("test"));
    }

    #[test]
    fn test_login_failures_share_text() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        let unknown = send(&mut ctx, conn, Command::Login, "ghost#x").reply;
        let wrong = send(&mut ctx, conn, Command::Login, "yossi#nope").reply;
        assert_eq!(unknown, wrong);
        assert_eq!(unknown.unwrap().command, Command::Error);
        assert_eq!(ctx.state_of(conn), SessionState::Anonymous);
    }

    #[test]
    fn test_login_malformed() {
        let mut ctx = context();
        let outcome = send(&mut ctx, ConnectionId(2), Command::Login, "test");
        assert_eq!(
            outcome.reply,
            Some(Message::new(
                Command::Error,
                "error occurred trying to understand your message!"
            ))
        );
    }

    #[test]
    fn test_second_login_rejected() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");
        let outcome = send(&mut ctx, conn, Command::Login, "yossi#123");
        assert_eq!(outcome.reply.unwrap().command, Command::Error);
        assert_eq!(ctx.sessions.username(conn), Some("test"));
    }

    #[test]
    fn test_logout_closes() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");
        let outcome = send(&mut ctx, conn, Command::Logout, "");
        assert_eq!(outcome.reply, None);
        assert_eq!(outcome.state, SessionState::Closed);
        assert!(ctx.sessions.is_empty());
    }

    #[test]
    fn test_my_score() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "yossi#123");
        let outcome = send(&mut ctx, conn, Command::MyScore, "");
        assert_eq!(outcome.reply, Some(Message::new(Command::YourScore, "50")));
    }

    #[test]
    fn test_highscore_table() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");
        let outcome = send(&mut ctx, conn, Command::Highscore, "");
        assert_eq!(
            outcome.reply,
            Some(Message::new(
                Command::AllScore,
                "master: 200\nyossi: 50\ntest: 0\n"
            ))
        );
    }

    #[test]
    fn test_logged_in_login_order() {
        let mut ctx = context();
        login(&mut ctx, ConnectionId(5), "master#master");
        login(&mut ctx, ConnectionId(2), "test#test");
        login(&mut ctx, ConnectionId(9), "yossi#123");

        let outcome = send(&mut ctx, ConnectionId(2), Command::Logged, "");
        assert_eq!(
            outcome.reply,
            Some(Message::new(Command::LoggedAnswer, "master, test, yossi"))
        );

        ctx.disconnect(ConnectionId(2));
        let outcome = send(&mut ctx, ConnectionId(9), Command::Logged, "");
        assert_eq!(
            outcome.reply,
            Some(Message::new(Command::LoggedAnswer, "master, yossi"))
        );
    }

    #[test]
    fn test_get_question_until_exhausted() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");

        let mut seen = Vec::new();
        for _ in 0..2 {
            let reply = send(&mut ctx, conn, Command::GetQuestion, "").reply.unwrap();
            assert_eq!(reply.command, Command::YourQuestion);
            let fields = split_fields(&reply.payload, 5).unwrap();
            assert_eq!(&fields[2..], ["a", "b", "c", "d"]);
            seen.push(fields[0].parse::<QuestionId>().unwrap());
        }
        seen.sort();
        assert_eq!(seen, vec![2313, 4122]);

        for _ in 0..3 {
            let reply = send(&mut ctx, conn, Command::GetQuestion, "").reply;
            assert_eq!(reply, Some(Message::empty(Command::NoQuestions)));
        }
        assert_eq!(ctx.users.lookup("test").unwrap().questions_asked.len(), 2);
    }

    #[test]
    fn test_get_question_skips_asked() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        ctx.users.lookup_mut("test").unwrap().questions_asked.insert(2313);
        login(&mut ctx, conn, "test#test");

        let reply = send(&mut ctx, conn, Command::GetQuestion, "").reply.unwrap();
        assert!(reply.payload.starts_with("4122#What is the capital of France?#"));
    }

    #[test]
    fn test_correct_answer_scores() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");

        let outcome = send(&mut ctx, conn, Command::SendAnswer, "2313#2");
        assert_eq!(outcome.reply, Some(Message::empty(Command::CorrectAnswer)));
        assert_eq!(ctx.users.lookup("test").unwrap().score, CORRECT_ANSWER_REWARD);
    }

    #[test]
    fn test_wrong_answer_reveals_correct() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "yossi#123");

        let outcome = send(&mut ctx, conn, Command::SendAnswer, "4122#1");
        assert_eq!(outcome.reply, Some(Message::new(Command::WrongAnswer, "3")));
        assert_eq!(ctx.users.lookup("yossi").unwrap().score, 50);
    }

    #[test]
    fn test_answer_errors() {
        let mut ctx = context();
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");

        let malformed = send(&mut ctx, conn, Command::SendAnswer, "2313").reply.unwrap();
        assert_eq!(malformed.payload, "error occurred trying to understand your message!");

        let unknown = send(&mut ctx, conn, Command::SendAnswer, "9999#1").reply.unwrap();
        assert_eq!(unknown, Message::new(Command::Error, "Error! No such question!"));

        let non_numeric = send(&mut ctx, conn, Command::SendAnswer, "abc#1").reply.unwrap();
        assert_eq!(non_numeric.command, Command::Error);
        assert_eq!(ctx.state_of(conn), SessionState::Authenticated);
    }

    #[test]
    fn test_score_persisted_to_file() {
        let path = std::env::temp_dir().join(format!("trivia-session-{}.json", std::process::id()));
        let mut ctx = context().with_persistence(&path);
        let conn = ConnectionId(2);
        login(&mut ctx, conn, "test#test");
        send(&mut ctx, conn, Command::SendAnswer, "2313#2");

        let reloaded = UserStore::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(reloaded.lookup("test").unwrap().score, 5);
    }

    #[test]
    fn test_session_table() {
        let mut table = SessionTable::new();
        table.insert(ConnectionId(3), "a".into());
        table.insert(ConnectionId(4), "b".into());
        table.insert(ConnectionId(3), "c".into());
        assert_eq!(table.len(), 2);
        assert_eq!(table.usernames().collect::<Vec<_>>(), ["b", "c"]);
        assert_eq!(table.remove(ConnectionId(4)), Some("b".into()));
        assert_eq!(table.remove(ConnectionId(4)), None);
    }
}
