//! Error types

use asn1_rs::Error as BerError;
use nom::error::{ErrorKind, FromExternalError, ParseError};

/// Holds the result of client operations and helpers
pub type Result<T> = std::result::Result<T, LdapError>;

/// An error that can occur while talking to a directory server or while
/// preparing a request for it.
///
/// Server-reported failures (a non-zero LDAP result code) are *not* errors:
/// they are reported through [`crate::LdapClient::result_code`] and the
/// boolean outcome of the operation.
#[derive(Debug, thiserror::Error)]
pub enum LdapError {
    #[error("Invalid LDAP String encoding")]
    InvalidString,

    #[error("Invalid DN: {0}")]
    InvalidDN(String),

    #[error("Invalid search filter: {0}")]
    InvalidFilter(String),

    #[error("Invalid object identifier: {0}")]
    InvalidOid(String),

    #[error("Invalid Type for Message")]
    InvalidMessageType,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid TLS server name")]
    InvalidServerName,

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("BER error: {0}")]
    Ber(#[from] BerError),
    #[error("nom error: {0:?}")]
    NomError(ErrorKind),
}

impl From<LdapError> for nom::Err<LdapError> {
    fn from(e: LdapError) -> nom::Err<LdapError> {
        nom::Err::Error(e)
    }
}

impl From<ErrorKind> for LdapError {
    fn from(e: ErrorKind) -> LdapError {
        LdapError::NomError(e)
    }
}

impl<I> ParseError<I> for LdapError {
    fn from_error_kind(_input: I, kind: ErrorKind) -> Self {
        LdapError::NomError(kind)
    }
    fn append(_input: I, kind: ErrorKind, _other: Self) -> Self {
        LdapError::NomError(kind)
    }
}

impl<I, E> FromExternalError<I, E> for LdapError {
    fn from_external_error(_input: I, kind: ErrorKind, _e: E) -> LdapError {
        LdapError::NomError(kind)
    }
}

impl From<nom::Err<LdapError>> for LdapError {
    fn from(e: nom::Err<LdapError>) -> LdapError {
        match e {
            nom::Err::Incomplete(_) => LdapError::Protocol("truncated message".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
        }
    }
}
