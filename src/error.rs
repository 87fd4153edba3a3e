//! Crate-wide error taxonomy.
//!
//! Each module boundary gets its own `thiserror` enum; the pipeline maps all
//! of these down to the stable NOTICE/OK vocabulary in `pipeline::halt`.

use thiserror::Error;

/// Errors raised while parsing or serializing the wire envelope.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum CodecError {
    /// A JSON escape sequence other than the standard set (`\" \\ \n \r \t \b \f \uXXXX`
    /// with code point >= 0x20) appeared in a string literal.
    #[error("unsupported JSON escape sequence")]
    UnsupportedEscape,
    /// A raw control character (< 0x20) appeared inside a JSON string.
    #[error("unsupported JSON literal control character")]
    UnsupportedLiteral,
    /// Any other syntactic fault: not an array, empty array, unknown token, wrong arity.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
    /// An embedded event's `id` does not match its recomputed hash, or its
    /// signature does not parse.
    #[error("embedded event failed to parse: {0}")]
    InvalidEvent(String),
}

/// Errors raised by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("query could not be built: {0}")]
    Query(String),
}

/// Errors raised while assembling [`crate::config::Config`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingVar(String),
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: String, value: String },
}

/// The reason a pipeline stage halted processing.
///
/// Stages that halt without queuing their own frames return one of these;
/// the engine maps each variant to the stable NOTICE text from SPEC_FULL §4.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    InvalidFormat,
    UnsupportedEscape,
    UnsupportedLiteral,
    UnsupportedMessageType,
    InvalidEventHash,
    InvalidCreatedAt,
    InvalidSignature,
    FilterPrefixTooShort,
    SubscriptionIdTooLong,
    MaxContentLengthExceeded,
    AuthRequired,
    AuthFailed,
    ChallengeMismatch,
    InvalidAuthKind,
    RelayTagMismatch,
    ProtectedEvent,
    DeletionCrossAuthor,
    EventDeleted,
    StaleReplacement,
    Duplicate,
    StoreQueryFailed,
    StoreWriteFailed,
    /// Catch-all for a stage-specific rejection whose frames are already queued.
    Handled,
}

impl HaltReason {
    /// The stable NOTICE text emitted when a halt produced no frames of its own.
    pub fn notice_text(&self) -> &'static str {
        match self {
            HaltReason::InvalidFormat => "invalid message format",
            HaltReason::UnsupportedEscape => "invalid message: unsupported JSON escape",
            HaltReason::UnsupportedLiteral => "invalid message: unsupported JSON literal control",
            HaltReason::UnsupportedMessageType => "unsupported message type",
            HaltReason::InvalidEventHash => "invalid: event ID does not match hash",
            HaltReason::InvalidCreatedAt => "invalid: invalid created_at",
            HaltReason::InvalidSignature => "invalid: event signature verification failed",
            HaltReason::FilterPrefixTooShort => "restricted: filter prefix too short",
            HaltReason::SubscriptionIdTooLong => "restricted: subscription id too long",
            HaltReason::MaxContentLengthExceeded => "restricted: max content length exceeded",
            HaltReason::AuthRequired => "auth-required: please authenticate",
            HaltReason::AuthFailed => "auth-required: authentication failed",
            HaltReason::ChallengeMismatch => "auth-required: challenge mismatch",
            HaltReason::InvalidAuthKind => "auth-required: invalid auth event kind",
            HaltReason::RelayTagMismatch => "auth-required: relay tag does not match this relay",
            HaltReason::ProtectedEvent => {
                "auth-required: protected event requires matching authenticated pubkey"
            }
            HaltReason::DeletionCrossAuthor => {
                "rejected: deletion can only target events by same pubkey"
            }
            HaltReason::EventDeleted => "rejected: event is deleted",
            HaltReason::StaleReplacement => "rejected: stale replacement event",
            HaltReason::Duplicate => "duplicate: already have this event",
            HaltReason::StoreQueryFailed => "could not query events",
            HaltReason::StoreWriteFailed => "could not store event",
            HaltReason::Handled => "request rejected",
        }
    }
}
