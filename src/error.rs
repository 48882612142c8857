//! Error hierarchy for the gateway.
//!
//! Only `GatewayError` (config/backend-init failures) is fatal. Everything
//! else is contained at the call site: `BackendError` fails the triggering
//! operation and the session continues, `LineProtocolError` becomes a
//! numeric reply, and `InvariantViolation` just drops the offending
//! notification entry with a debug log.

use thiserror::Error;

/// Top-level error surfaced from `main`. Both variants are fatal.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("backend initialization failed: {0}")]
    BackendInit(#[from] BackendInitError),

    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),
}

/// Configuration file/CLI errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors reaching the messaging-service backend: transport failures and
/// non-empty `error` fields in the RPC response envelope. Recovered locally
/// everywhere except `StartUp`/`EnumerateLocalAccounts`, which escalate to
/// `BackendInitError`.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Fatal failure during backend bootstrap (`StartUp` or
/// `EnumerateLocalAccounts`). The process exits after logging this.
#[derive(Debug, Error)]
pub enum BackendInitError {
    #[error("no local account found on this device")]
    NoLocalAccount,

    #[error("backend error during startup: {0}")]
    Backend(#[from] BackendError),

    #[error("failed to launch backend subprocess: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("backend handshake failed: {0}")]
    Handshake(String),
}

/// Malformed or unrecognized client input. Never propagated past the
/// session — every call site converts this straight to a numeric reply.
#[derive(Debug, Clone, Error)]
pub enum LineProtocolError {
    #[error("no recipient given")]
    NoRecipient,
    #[error("no text to send")]
    NoTextToSend,
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("no origin specified")]
    NoPingOrigin,
    #[error("no such nick/channel: {0}")]
    NoSuchTarget(String),
}

impl LineProtocolError {
    /// Numeric reply code this error maps to.
    pub fn numeric(&self) -> u16 {
        match self {
            Self::NoRecipient => 411,
            Self::NoTextToSend => 412,
            Self::UnknownCommand(_) => 421,
            Self::NoPingOrigin => 409,
            Self::NoSuchTarget(_) => 401,
        }
    }
}
