//! Typed error hierarchy for the VNC/RFB session.
//!
//! Every failure mode gets its own variant so callers can match on
//! category (is this fatal? auth-related? a local policy refusal?)
//! instead of fragile substring matching on error text.

use std::fmt;
use std::io;

/// A certificate validation failure subtype (RFB §4.5.1 x509 path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertProblem {
    Untrusted,
    Expired,
    NotYetValid,
    Revoked,
    Algorithm,
    HostnameMismatch,
}

impl fmt::Display for CertProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Untrusted => "untrusted issuer",
            Self::Expired => "certificate expired",
            Self::NotYetValid => "certificate not yet valid",
            Self::Revoked => "certificate revoked",
            Self::Algorithm => "unsupported signature algorithm",
            Self::HostnameMismatch => "hostname mismatch",
        };
        write!(f, "{s}")
    }
}

/// Structured error type for the VNC session lifecycle.
///
/// Each variant maps to a failure *category* from the error handling
/// design — callers match on the variant rather than parsing the
/// inner description string.
#[derive(Debug)]
pub enum VncError {
    /// The remote end closed the connection cleanly.
    NetworkClosed,
    /// A non-EOF I/O failure on the transport.
    NetworkIo(io::Error),
    /// Unexpected byte, exceeded length cap, or out-of-bounds update rect.
    ProtocolViolation(String),
    /// The server only offered security types we don't implement.
    AuthUnsupported(String),
    /// Authentication was attempted and rejected, optionally with the
    /// server's own UTF-8 reason string.
    AuthFailed(Option<String>),
    /// TLS handshake or negotiation failure.
    TlsFailure(String),
    /// SASL negotiation failure.
    SaslFailure(String),
    /// x509 chain validation failed for the stated reason.
    CertificateInvalid(CertProblem),
    /// A decode failure: zlib inflate, JPEG, CPIXEL/TPIXEL, palette index
    /// out of range.
    Decode(String),
    /// A local policy refusal (insufficient SSF, refusal to send a
    /// plaintext password over an unencrypted channel, etc).
    LocalPolicy(String),
}

impl fmt::Display for VncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkClosed => write!(f, "connection closed by peer"),
            Self::NetworkIo(e) => write!(f, "network I/O error: {e}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::AuthUnsupported(msg) => write!(f, "no supported auth type: {msg}"),
            Self::AuthFailed(Some(reason)) => write!(f, "authentication failed: {reason}"),
            Self::AuthFailed(None) => write!(f, "authentication failed"),
            Self::TlsFailure(msg) => write!(f, "TLS failure: {msg}"),
            Self::SaslFailure(msg) => write!(f, "SASL failure: {msg}"),
            Self::CertificateInvalid(p) => write!(f, "certificate invalid: {p}"),
            Self::Decode(msg) => write!(f, "decode error: {msg}"),
            Self::LocalPolicy(msg) => write!(f, "local policy: {msg}"),
        }
    }
}

impl std::error::Error for VncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NetworkIo(e) => Some(e),
            _ => None,
        }
    }
}

impl VncError {
    /// `true` for errors that stem from auth negotiation — used by hosts
    /// that want to special-case credential re-prompting.
    pub fn is_auth_related(&self) -> bool {
        matches!(
            self,
            Self::AuthUnsupported(_) | Self::AuthFailed(_) | Self::SaslFailure(_)
        )
    }

    /// Every error in this taxonomy is terminal: the stickiness policy
    /// (§7) never allows mid-session recovery. Kept as a predicate so
    /// call sites read as intent rather than a bare `true` literal.
    pub fn is_fatal(&self) -> bool {
        true
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::ProtocolViolation(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn local_policy(msg: impl Into<String>) -> Self {
        Self::LocalPolicy(msg.into())
    }

    /// Classify an `io::Error` into `NetworkClosed` vs `NetworkIo`.
    pub fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::NetworkClosed
        } else {
            Self::NetworkIo(e)
        }
    }
}

impl From<io::Error> for VncError {
    fn from(e: io::Error) -> Self {
        Self::from_io(e)
    }
}

/// `protocol.rs`'s parsers and pixel codecs report malformed wire data
/// as plain `String`s; every such failure is a decode failure from the
/// session's point of view.
impl From<String> for VncError {
    fn from(msg: String) -> Self {
        Self::Decode(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failed_display_with_reason() {
        let e = VncError::AuthFailed(Some("bad password".into()));
        assert_eq!(e.to_string(), "authentication failed: bad password");
    }

    #[test]
    fn auth_failed_display_without_reason() {
        let e = VncError::AuthFailed(None);
        assert_eq!(e.to_string(), "authentication failed");
    }

    #[test]
    fn io_error_classifies_eof_as_network_closed() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let e: VncError = io_err.into();
        assert!(matches!(e, VncError::NetworkClosed));
    }

    #[test]
    fn io_error_classifies_other_as_network_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let e: VncError = io_err.into();
        assert!(matches!(e, VncError::NetworkIo(_)));
    }

    #[test]
    fn auth_related_predicate() {
        assert!(VncError::AuthFailed(None).is_auth_related());
        assert!(VncError::AuthUnsupported("none".into()).is_auth_related());
        assert!(VncError::SaslFailure("x".into()).is_auth_related());
        assert!(!VncError::NetworkClosed.is_auth_related());
    }

    #[test]
    fn certificate_invalid_display() {
        let e = VncError::CertificateInvalid(CertProblem::HostnameMismatch);
        assert_eq!(e.to_string(), "certificate invalid: hostname mismatch");
    }

    #[test]
    fn all_errors_are_fatal() {
        assert!(VncError::NetworkClosed.is_fatal());
        assert!(VncError::Decode("x".into()).is_fatal());
    }
}
