//! Trivia Server
//!
//! Single-threaded, readiness-driven connection multiplexer built on `mio`.
//! One listener plus any number of client connections share one poll; every
//! decoded frame is handed to the [`ServerContext`] on the loop thread, so no
//! state needs a lock.
//!
//! ```text
//!  listener ──accept──► Connection { inbound, outbound queue }
//!                            │ readable: next_frame ─► ServerContext::handle
//!                            │ writable: flush queue (partial writes kept)
//!                            ▼
//!                        disconnect (session + queue dropped)
//! ```

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, instrument, warn};

use crate::game::questions::OPEN_TRIVIA_URL;
use crate::network::codec::{encode_message, next_frame};
use crate::network::protocol::Message;
use crate::network::session::{ConnectionId, HandlerError, ServerContext, SessionState};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Where questions come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuestionSource {
    /// JSON question file.
    File(PathBuf),
    /// Open Trivia DB endpoint.
    Web(String),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Events handled per poll.
    pub event_capacity: usize,
    /// Bytes read per `read` call.
    pub read_chunk_size: usize,
    /// Disconnect connections silent for this long. `None` disables.
    pub idle_timeout: Option<Duration>,
    /// JSON user file.
    pub users_path: PathBuf,
    /// Question source.
    pub question_source: QuestionSource,
    /// Fixed seed for question selection. Clock-seeded when `None`.
    pub question_seed: Option<u64>,
    /// Write the user file after every score change.
    pub persist_scores: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5678)),
            max_connections: 1024,
            event_capacity: 256,
            read_chunk_size: 4096,
            idle_timeout: None,
            users_path: PathBuf::from("databases/users.json"),
            question_source: QuestionSource::File(PathBuf::from("databases/questions.json")),
            question_seed: None,
            persist_scores: false,
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl ServerConfig {
    /// Create config from `TRIVIA_*` environment variables. Unset or
    /// unparsable values keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let question_source = match std::env::var("TRIVIA_QUESTION_SOURCE").as_deref() {
            Ok("web") => QuestionSource::Web(
                std::env::var("TRIVIA_WEB_QUESTIONS_URL").unwrap_or_else(|_| OPEN_TRIVIA_URL.to_string()),
            ),
            _ => std::env::var("TRIVIA_QUESTIONS_PATH")
                .map(|p| QuestionSource::File(PathBuf::from(p)))
                .unwrap_or(defaults.question_source),
        };

        Self {
            bind_addr: env_parse("TRIVIA_BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: env_parse("TRIVIA_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            event_capacity: env_parse("TRIVIA_EVENT_CAPACITY").unwrap_or(defaults.event_capacity),
            read_chunk_size: env_parse("TRIVIA_READ_CHUNK_SIZE").unwrap_or(defaults.read_chunk_size),
            idle_timeout: env_parse::<u64>("TRIVIA_IDLE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            users_path: std::env::var("TRIVIA_USERS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.users_path),
            question_source,
            question_seed: env_parse("TRIVIA_QUESTION_SEED"),
            persist_scores: std::env::var("TRIVIA_PERSIST_SCORES")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }
}

/// Server errors. Client socket failures never surface here; they only
/// close the connection.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Poll wait failed.
    #[error("Poll error: {0}")]
    Poll(#[source] io::Error),

    /// Other listener or registry failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// SHUTDOWN
// =============================================================================

/// Stops [`TriviaServer::run`] from another thread.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the loop to stop after the current iteration.
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Err(e) = self.waker.wake() {
            warn!("Failed to wake server loop: {}", e);
        }
    }
}

// =============================================================================
// CONNECTIONS
// =============================================================================

#[derive(Debug)]
struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    inbound: Vec<u8>,
    outbound: VecDeque<Vec<u8>>,
    /// Bytes of the queue head already written.
    head_written: usize,
    write_interest: bool,
    last_activity: Instant,
}

impl Connection {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            head_written: 0,
            write_interest: false,
            last_activity: Instant::now(),
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The trivia server.
pub struct TriviaServer {
    config: ServerConfig,
    poll: Poll,
    listener: TcpListener,
    connections: HashMap<ConnectionId, Connection>,
    next_id: usize,
    context: ServerContext,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl TriviaServer {
    /// Bind the listener and prepare the poll.
    pub fn bind(config: ServerConfig, context: ServerContext) -> Result<Self, ServerError> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::bind(config.bind_addr).map_err(|source| ServerError::Bind {
            addr: config.bind_addr,
            source,
        })?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);

        Ok(Self {
            config,
            poll,
            listener,
            connections: HashMap::new(),
            next_id: FIRST_CONNECTION,
            context,
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle that stops [`run`](Self::run).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            waker: self.waker.clone(),
        }
    }

    /// Shared handler state.
    pub fn context(&self) -> &ServerContext {
        &self.context
    }

    /// Open client connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Serve until shut down.
    #[instrument(skip(self), fields(addr = %self.config.bind_addr))]
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!("Trivia server listening on {}", self.local_addr()?);
        let mut events = Events::with_capacity(self.config.event_capacity);

        while !self.shutdown.load(Ordering::SeqCst) {
            self.poll_once(&mut events)?;
        }

        info!("Shutdown signal received, closing {} connections", self.connections.len());
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.disconnect(id, "server shutdown");
        }
        Ok(())
    }

    fn poll_once(&mut self, events: &mut Events) -> Result<(), ServerError> {
        match self.poll.poll(events, self.config.idle_timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ServerError::Poll(e)),
        }

        for event in events.iter() {
            match event.token() {
                LISTENER => self.accept_connections(),
                WAKER => debug!("Server loop woken"),
                token => {
                    let id = ConnectionId(token.0);
                    if event.is_readable() || event.is_read_closed() || event.is_error() {
                        self.handle_readable(id);
                    }
                    if event.is_writable() {
                        self.flush(id);
                    }
                }
            }
        }

        if let Some(timeout) = self.config.idle_timeout {
            self.sweep_idle(timeout);
        }
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= self.config.max_connections {
                        warn!("Connection limit reached, rejecting {}", peer);
                        continue;
                    }

                    let id = ConnectionId(self.next_id);
                    self.next_id += 1;

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(id.0), Interest::READABLE)
                    {
                        error!("Failed to register {}: {}", peer, e);
                        continue;
                    }

                    info!("New connection {} from {}", id, peer);
                    self.connections.insert(id, Connection::new(stream, peer));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!("Accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn handle_readable(&mut self, id: ConnectionId) {
        let mut chunk = vec![0u8; self.config.read_chunk_size.max(1)];

        loop {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };

            match conn.stream.read(&mut chunk) {
                Ok(0) => {
                    self.disconnect(id, "peer closed connection");
                    return;
                }
                Ok(n) => {
                    conn.inbound.extend_from_slice(&chunk[..n]);
                    conn.last_activity = Instant::now();
                    if !self.dispatch_frames(id) {
                        return;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.disconnect(id, &format!("read error: {}", e));
                    return;
                }
            }
        }

        self.update_interest(id);
    }

    /// Hand every complete buffered frame to the context. Returns false once
    /// the connection is gone.
    fn dispatch_frames(&mut self, id: ConnectionId) -> bool {
        loop {
            let Some(conn) = self.connections.get_mut(&id) else {
                return false;
            };

            let message = match next_frame(&mut conn.inbound) {
                Ok(Some(message)) => message,
                Ok(None) => return true,
                Err(e) => {
                    warn!("{} sent an invalid frame: {}", id, e);
                    self.disconnect(id, "framing error");
                    return false;
                }
            };

            let outcome = self.context.handle(id, &message);
            if let Some(reply) = outcome.reply {
                self.queue_reply(id, reply);
            }
            if outcome.state == SessionState::Closed {
                self.disconnect(id, "logout");
                return false;
            }
        }
    }

    fn queue_reply(&mut self, id: ConnectionId, reply: Message) {
        let frame = match encode_message(&reply) {
            Ok(frame) => frame,
            Err(e) => {
                error!("{} reply {} could not be encoded: {}", id, reply.command, e);
                match encode_message(&HandlerError::ReplyTooLong(e).to_reply()) {
                    Ok(frame) => frame,
                    Err(_) => return,
                }
            }
        };

        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };
        debug!("{} <- {}", id, frame);
        conn.outbound.push_back(frame.into_bytes());
        self.update_interest(id);
    }

    fn flush(&mut self, id: ConnectionId) {
        loop {
            let Some(conn) = self.connections.get_mut(&id) else {
                return;
            };
            let Some(head) = conn.outbound.front() else {
                break;
            };

            match conn.stream.write(&head[conn.head_written..]) {
                Ok(0) => {
                    self.disconnect(id, "write returned zero");
                    return;
                }
                Ok(n) => {
                    conn.head_written += n;
                    if conn.head_written >= head.len() {
                        conn.outbound.pop_front();
                        conn.head_written = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.disconnect(id, &format!("write error: {}", e));
                    return;
                }
            }
        }

        self.update_interest(id);
    }

    /// Keep WRITABLE registered exactly while output is queued.
    fn update_interest(&mut self, id: ConnectionId) {
        let Some(conn) = self.connections.get_mut(&id) else {
            return;
        };

        let wants_write = !conn.outbound.is_empty();
        if wants_write == conn.write_interest {
            return;
        }

        let interest = if wants_write {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        match self
            .poll
            .registry()
            .reregister(&mut conn.stream, Token(id.0), interest)
        {
            Ok(()) => conn.write_interest = wants_write,
            Err(e) => {
                let reason = format!("reregister failed: {}", e);
                self.disconnect(id, &reason);
            }
        }
    }

    fn sweep_idle(&mut self, timeout: Duration) {
        let now = Instant::now();
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, c)| now.duration_since(c.last_activity) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in idle {
            self.disconnect(id, "idle timeout");
        }
    }

    fn disconnect(&mut self, id: ConnectionId, reason: &str) {
        let Some(mut conn) = self.connections.remove(&id) else {
            return;
        };

        if let Err(e) = self.poll.registry().deregister(&mut conn.stream) {
            debug!("{} deregister failed: {}", id, e);
        }
        self.context.disconnect(id);

        if conn.outbound.is_empty() {
            info!("Connection {} ({}) closed: {}", id, conn.peer, reason);
        } else {
            info!(
                "Connection {} ({}) closed: {}, dropped {} queued replies",
                id,
                conn.peer,
                reason,
                conn.outbound.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::DeterministicRng;
    use crate::game::questions::{Question, QuestionBank};
    use crate::game::users::{User, UserStore};
    use crate::network::codec::encode;
    use std::net::TcpStream as StdTcpStream;
    use std::thread;

    fn context() -> ServerContext {
        let users = UserStore::from_users([User::new("test", "test")]).unwrap();
        let answers = ["3", "4", "2", "1"].iter().map(|s| s.to_string()).collect();
        let questions =
            QuestionBank::from_questions([Question::new(2313, "How much is 2+2", answers, 2).unwrap()])
                .unwrap();
        ServerContext::new(users, questions, DeterministicRng::new(1))
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        }
    }

    fn read_frame(stream: &mut StdTcpStream) -> String {
        let mut header = [0u8; 22];
        stream.read_exact(&mut header).unwrap();
        let len: usize = std::str::from_utf8(&header[17..21]).unwrap().trim().parse().unwrap();
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).unwrap();
        format!(
            "{}{}",
            String::from_utf8(header.to_vec()).unwrap(),
            String::from_utf8(payload).unwrap()
        )
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 5678);
        assert_eq!(config.max_connections, 1024);
        assert!(config.idle_timeout.is_none());
        assert!(!config.persist_scores);
        assert!(matches!(config.question_source, QuestionSource::File(_)));
    }

    #[test]
    fn test_server_bind_ephemeral() {
        let server = TriviaServer::bind(test_config(), context()).unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.connection_count(), 0);
        assert!(server.context().sessions.is_empty());
    }

    #[test]
    fn test_server_shutdown() {
        let mut server = TriviaServer::bind(test_config(), context()).unwrap();
        let handle = server.shutdown_handle();
        let worker = thread::spawn(move || server.run());
        handle.shutdown();
        assert!(worker.join().unwrap().is_ok());
    }

    #[test]
    fn test_login_and_split_frames() {
        let mut server = TriviaServer::bind(test_config(), context()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let worker = thread::spawn(move || server.run());

        let mut client = StdTcpStream::connect(addr).unwrap();
        let login = encode("LOGIN", "test#test").unwrap();
        let (first, second) = login.as_bytes().split_at(10);
        client.write_all(first).unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(50));
        client.write_all(second).unwrap();
        assert_eq!(read_frame(&mut client), "LOGIN_OK        |0000|");

        // Two frames in one write.
        let batch = format!(
            "{}{}",
            encode("MY_SCORE", "").unwrap(),
            encode("SEND_ANSWER", "2313#2").unwrap()
        );
        client.write_all(batch.as_bytes()).unwrap();
        assert_eq!(read_frame(&mut client), "YOUR_SCORE      |0001|0");
        assert_eq!(read_frame(&mut client), "CORRECT_ANSWER  |0000|");

        handle.shutdown();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_bad_frame_disconnects() {
        let mut server = TriviaServer::bind(test_config(), context()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let worker = thread::spawn(move || server.run());

        let mut client = StdTcpStream::connect(addr).unwrap();
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);

        handle.shutdown();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_idle_timeout_disconnects() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(100)),
            ..test_config()
        };
        let mut server = TriviaServer::bind(config, context()).unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.shutdown_handle();
        let worker = thread::spawn(move || server.run());

        let mut client = StdTcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).unwrap_or(0), 0);

        handle.shutdown();
        worker.join().unwrap().unwrap();
    }
}
