//! Wire protocol — command vocabulary and framing primitives.
//!
//! Every frame is one command byte followed by that command's payload:
//! newline-terminated ASCII lines for scalars and raw binary blocks for
//! chunk bodies. The codec in [`wire`] exposes the primitives; the transfer
//! drivers own the semantics.

pub mod resume;
pub mod wire;

use crate::error::TransferError;

/// Upper bound on a single payload line. Sized for the comma-separated
/// completed-chunk-indices line of the Resume frame, which grows with the
/// chunk count of very large transfers.
pub const MAX_LINE_LEN: usize = 64 * 1024 * 1024;

/// Verdict token returned by the receiver when digests match.
pub const HASH_VERIFIED: &str = "HASH_VERIFIED";

/// Command vocabulary. The discriminant is the first byte of each frame.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Command {
    /// C→S: filename, file size, verify preference.
    Init = 1,
    /// S→C: request the chunk at an absolute byte offset.
    Request = 2,
    /// C→S: one chunk body, optionally compressed.
    Data = 3,
    /// S→C: transfer finished.
    Complete = 4,
    /// Either direction: fatal failure with a message line.
    Error = 5,
    /// Either direction: digest request, digest reply, or verdict.
    Hash = 6,
    /// S→C: name of the negotiated digest algorithm.
    HashAlgo = 7,
    /// Either direction: RTT probe.
    Ping = 8,
    /// Either direction: RTT probe reply.
    Pong = 9,
    /// Reserved for protocol version negotiation.
    Version = 10,
    /// S→C: resume offer with the completed-chunk bitmap.
    Resume = 11,
    /// C→S: accept or reject the resume offer.
    ResumeAck = 12,
}

impl Command {
    /// Wire name, for diagnostics and unexpected-command errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "Init",
            Self::Request => "Request",
            Self::Data => "Data",
            Self::Complete => "Complete",
            Self::Error => "Error",
            Self::Hash => "Hash",
            Self::HashAlgo => "HashAlgo",
            Self::Ping => "Ping",
            Self::Pong => "Pong",
            Self::Version => "Version",
            Self::Resume => "Resume",
            Self::ResumeAck => "ResumeAck",
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = TransferError;

    fn try_from(value: u8) -> Result<Self, TransferError> {
        match value {
            1 => Ok(Self::Init),
            2 => Ok(Self::Request),
            3 => Ok(Self::Data),
            4 => Ok(Self::Complete),
            5 => Ok(Self::Error),
            6 => Ok(Self::Hash),
            7 => Ok(Self::HashAlgo),
            8 => Ok(Self::Ping),
            9 => Ok(Self::Pong),
            10 => Ok(Self::Version),
            11 => Ok(Self::Resume),
            12 => Ok(Self::ResumeAck),
            other => Err(TransferError::UnknownCommand(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_byte_roundtrip() {
        for code in 1u8..=12 {
            let cmd = Command::try_from(code).unwrap();
            assert_eq!(cmd as u8, code);
        }
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(matches!(
            Command::try_from(0),
            Err(TransferError::UnknownCommand(0))
        ));
        assert!(matches!(
            Command::try_from(13),
            Err(TransferError::UnknownCommand(13))
        ));
    }
}
