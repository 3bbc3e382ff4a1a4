//! Error taxonomy shared by every Capone crate.
//!
//! One variant per error class. The class is what crosses the wire in a
//! `SessionResult` and what the client surfaces as its exit status, so the
//! `code()` values are part of the protocol and must stay stable.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing key, malformed hex, unknown section.
    #[error("config: {0}")]
    Config(String),

    /// Socket, file, or signal failure; includes truncated reads.
    #[error("i/o: {0}")]
    Io(#[from] io::Error),

    /// Framing violation, unknown tag, unexpected message, length bound
    /// exceeded.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Signature or AEAD verification failure, degenerate scalarmult.
    #[error("crypto: {0}")]
    Crypto(String),

    /// ACL deny or capability verification failure.
    #[error("unauthorized")]
    Unauthorized,

    /// Session identifier unknown (includes already-consumed sessions).
    #[error("session not found")]
    NotFound,

    /// Malformed capability string, out-of-range parameter, unknown command.
    #[error("invalid: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wire code for `SessionResult.result`. Zero is reserved for success.
    pub fn code(&self) -> i32 {
        match self {
            Error::Config(_) => 1,
            Error::Io(_) => 2,
            Error::Protocol(_) => 3,
            Error::Crypto(_) => 4,
            Error::Unauthorized => 5,
            Error::NotFound => 6,
            Error::Invalid(_) => 7,
        }
    }

    /// Reconstruct the error class a remote reported in a `SessionResult`.
    /// Unknown codes collapse to Protocol — the peer is speaking something
    /// newer than us.
    pub fn from_code(code: i32) -> Error {
        match code {
            1 => Error::Config("reported by remote".into()),
            2 => Error::Io(io::Error::other("reported by remote")),
            3 => Error::Protocol("reported by remote".into()),
            4 => Error::Crypto("reported by remote".into()),
            5 => Error::Unauthorized,
            6 => Error::NotFound,
            7 => Error::Invalid("reported by remote".into()),
            other => Error::Protocol(format!("unknown result code {other}")),
        }
    }
}
