//! Field Validators
//!
//! Single-rule checks used by the codec. Each check fails with exactly one
//! [`CodecError`] kind. The grouped validators run them in a fixed order:
//! delimiter count, overall length, per-field width, command membership,
//! numeric length.

use crate::network::codec::CodecError;
use crate::network::protocol::{
    Command, CMD_FIELD_LENGTH, DELIMITER, LENGTH_FIELD_LENGTH, MAX_DATA_LENGTH, MAX_MSG_LENGTH,
};

// =============================================================================
// SINGLE-RULE CHECKS
// =============================================================================

/// Command and payload must fit their fields when building a frame.
pub fn check_build_lengths(cmd: &str, data: &str) -> Result<(), CodecError> {
    if data.len() > MAX_DATA_LENGTH || cmd.len() > CMD_FIELD_LENGTH {
        return Err(CodecError::FieldTooLong);
    }
    Ok(())
}

/// The command name must be in the client or server vocabulary.
pub fn check_vocabulary(cmd: &str) -> Result<Command, CodecError> {
    Command::from_wire(cmd).ok_or_else(|| CodecError::UnknownCommand(cmd.to_string()))
}

/// A raw frame holds exactly two frame delimiters.
pub fn check_delimiter_count(raw: &str) -> Result<(), CodecError> {
    let count = raw.matches(DELIMITER).count();
    if count != 2 {
        return Err(CodecError::InvalidDelimiterCount(count));
    }
    Ok(())
}

/// A raw frame never exceeds [`MAX_MSG_LENGTH`].
pub fn check_message_length(raw: &str) -> Result<(), CodecError> {
    if raw.len() > MAX_MSG_LENGTH {
        return Err(CodecError::MessageTooLong(raw.len()));
    }
    Ok(())
}

/// Command and length fields have their exact widths; payload fits.
pub fn check_field_widths(cmd: &str, length: &str, payload: &str) -> Result<(), CodecError> {
    if cmd.len() != CMD_FIELD_LENGTH
        || length.len() != LENGTH_FIELD_LENGTH
        || payload.len() > MAX_DATA_LENGTH
    {
        return Err(CodecError::FieldLengthMismatch);
    }
    Ok(())
}

/// Parse the length field. Spaces count as zeros, so `"   9"` is `9`.
pub fn parse_length_field(length: &str) -> Result<usize, CodecError> {
    let normalized: String = length
        .chars()
        .map(|c| if c == ' ' { '0' } else { c })
        .collect();

    if normalized.is_empty() || !normalized.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CodecError::NonNumericLength(length.to_string()));
    }

    normalized
        .parse()
        .map_err(|_| CodecError::NonNumericLength(length.to_string()))
}

// =============================================================================
// GROUPED VALIDATORS
// =============================================================================

/// Checks applied before building a frame.
pub fn validate_build(cmd: &str, data: &str) -> Result<Command, CodecError> {
    check_build_lengths(cmd, data)?;
    check_vocabulary(cmd)
}

/// Checks applied to a whole raw frame before it is split.
pub fn validate_frame(raw: &str) -> Result<(), CodecError> {
    check_delimiter_count(raw)?;
    check_message_length(raw)
}

/// Checks applied to the three split fields. Returns the command and the
/// declared payload length.
pub fn validate_fields(
    cmd: &str,
    length: &str,
    payload: &str,
) -> Result<(Command, usize), CodecError> {
    check_field_widths(cmd, length, payload)?;
    let command = check_vocabulary(cmd.trim_matches(' '))?;
    let declared = parse_length_field(length)?;
    Ok((command, declared))
}
