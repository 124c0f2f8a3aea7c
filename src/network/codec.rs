//! Protocol Codec
//!
//! Pure encode/decode of trivia frames. No I/O happens here: the server and
//! the client feed raw bytes in and get [`Message`]s out.

use thiserror::Error;

use crate::network::protocol::{
    Command, Message, CMD_FIELD_LENGTH, DATA_DELIMITER, DELIMITER, LENGTH_FIELD_LENGTH,
    MAX_DATA_LENGTH, MSG_HEADER_LENGTH,
};
use crate::network::validate::{parse_length_field, validate_build, validate_fields, validate_frame};

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Command or payload does not fit its field.
    #[error("one of the fields' length in the protocol is over the limit")]
    FieldTooLong,

    /// Command name outside the vocabulary.
    #[error("the provided command: {0}, does not exist")]
    UnknownCommand(String),

    /// Frame does not hold exactly two frame delimiters.
    #[error("there are {0} delimiters in the message but there should be 2")]
    InvalidDelimiterCount(usize),

    /// Frame longer than the protocol allows.
    #[error("message of {0} bytes exceeds the maximum frame length")]
    MessageTooLong(usize),

    /// Command or length field has the wrong width, or the payload is too long.
    #[error("frame fields have invalid widths")]
    FieldLengthMismatch,

    /// Length field is not made of digits and spaces.
    #[error("the length field {0:?} does not consist of only digits or spaces")]
    NonNumericLength(String),

    /// Payload split into the wrong number of records.
    #[error("expected {expected} payload fields, found {found}")]
    FieldCountMismatch {
        /// Fields required by the command.
        expected: usize,
        /// Fields present.
        found: usize,
    },

    /// Joined payload exceeds [`MAX_DATA_LENGTH`].
    #[error("payload of {0} bytes exceeds the maximum data length")]
    DataTooLong(usize),

    /// Frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidEncoding,

    /// A record holds `#` or `|`.
    #[error("field {0:?} contains a reserved delimiter")]
    ReservedDelimiter(String),
}

// =============================================================================
// FRAMES
// =============================================================================

/// Build a frame from a command name and a payload.
///
/// ```
/// use trivia::network::codec::encode;
///
/// assert_eq!(encode("LOGIN", "aaaa#bbbb").unwrap(), "LOGIN           |0009|aaaa#bbbb");
/// ```
pub fn encode(cmd: &str, payload: &str) -> Result<String, CodecError> {
    validate_build(cmd, payload)?;

    Ok(format!(
        "{:<cmd_width$}{}{:0len_width$}{}{}",
        cmd,
        DELIMITER,
        payload.len(),
        DELIMITER,
        payload,
        cmd_width = CMD_FIELD_LENGTH,
        len_width = LENGTH_FIELD_LENGTH,
    ))
}

/// Build a frame from a typed message.
pub fn encode_message(message: &Message) -> Result<String, CodecError> {
    encode(message.command.as_str(), &message.payload)
}

/// Parse one complete frame.
///
/// The declared length is validated as a number but not compared with the
/// payload; [`next_frame`] uses it to cut frames out of a byte stream.
pub fn decode(raw: &str) -> Result<Message, CodecError> {
    validate_frame(raw)?;

    let parts: Vec<&str> = raw.split(DELIMITER).collect();
    let &[cmd, length, payload] = parts.as_slice() else {
        return Err(CodecError::InvalidDelimiterCount(parts.len().saturating_sub(1)));
    };

    let (command, _declared) = validate_fields(cmd, length, payload)?;

    Ok(Message::new(command, payload))
}

/// Pull the next complete frame off the front of a receive buffer.
///
/// Returns `Ok(None)` while the buffer holds only part of a frame. On success
/// exactly one frame is drained from the buffer. Any error means the stream
/// cannot be resynchronized.
pub fn next_frame(buffer: &mut Vec<u8>) -> Result<Option<Message>, CodecError> {
    if buffer.len() < MSG_HEADER_LENGTH {
        return Ok(None);
    }

    let header = &buffer[..MSG_HEADER_LENGTH];
    if header[CMD_FIELD_LENGTH] != DELIMITER as u8 || header[MSG_HEADER_LENGTH - 1] != DELIMITER as u8 {
        return Err(CodecError::FieldLengthMismatch);
    }

    let length_field = std::str::from_utf8(&header[CMD_FIELD_LENGTH + 1..MSG_HEADER_LENGTH - 1])
        .map_err(|_| CodecError::InvalidEncoding)?;
    let declared = parse_length_field(length_field)?;

    let total = MSG_HEADER_LENGTH + declared;
    if buffer.len() < total {
        return Ok(None);
    }

    let frame: Vec<u8> = buffer.drain(..total).collect();
    let raw = String::from_utf8(frame).map_err(|_| CodecError::InvalidEncoding)?;

    decode(&raw).map(Some)
}

// =============================================================================
// PAYLOAD RECORDS
// =============================================================================

/// Split a payload on `#`, requiring exactly `expected_delimiters` separators.
///
/// ```
/// use trivia::network::codec::split_fields;
///
/// assert_eq!(split_fields("username#password", 1).unwrap(), vec!["username", "password"]);
/// assert!(split_fields("a#b#c", 1).is_err());
/// ```
pub fn split_fields(payload: &str, expected_delimiters: usize) -> Result<Vec<&str>, CodecError> {
    let fields: Vec<&str> = payload.split(DATA_DELIMITER).collect();
    if fields.len() != expected_delimiters + 1 {
        return Err(CodecError::FieldCountMismatch {
            expected: expected_delimiters + 1,
            found: fields.len(),
        });
    }
    Ok(fields)
}

/// Join records with `#`. A record holding `#` or `|` is rejected.
pub fn join_fields<S: AsRef<str>>(fields: &[S]) -> Result<String, CodecError> {
    let mut joined = String::new();
    for (i, field) in fields.iter().enumerate() {
        let field = field.as_ref();
        if field.contains(DATA_DELIMITER) || field.contains(DELIMITER) {
            return Err(CodecError::ReservedDelimiter(field.to_string()));
        }
        if i > 0 {
            joined.push(DATA_DELIMITER);
        }
        joined.push_str(field);
    }

    if joined.len() > MAX_DATA_LENGTH {
        return Err(CodecError::DataTooLong(joined.len()));
    }
    Ok(joined)
}

// =============================================================================
// TESTS
// =============================================================================
