use std::fmt;

/// Error kind. Decides how a pipeline reacts to the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or inconsistent configuration. Fatal at startup.
    Config,
    /// Payload does not match the envelope or the catalog. Message is skipped.
    Decode,
    /// A single row was rejected by the destination. Row is skipped.
    Row,
    /// Bus or destination unreachable, timed out or overloaded. Retried.
    Unavailable,
    /// Credentials or permissions rejected. Fatal.
    Auth,
    /// Destination table does not match the catalog. Fatal.
    Schema,
}

/// Error returned by every source and sink trait method.
#[derive(Debug, Clone)]
pub struct CdcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl CdcError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Decode, message: msg.into() }
    }

    pub fn row(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Row, message: msg.into() }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Unavailable, message: msg.into() }
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Auth, message: msg.into() }
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Schema, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Config, auth and schema errors terminate the pipeline that hit them.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Config | ErrorKind::Auth | ErrorKind::Schema)
    }

    /// Only unavailability is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Unavailable
    }

    /// Add context to the error, preserving the original ErrorKind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CdcError {}

impl From<serde_json::Error> for CdcError {
    fn from(e: serde_json::Error) -> Self {
        Self::decode(e.to_string())
    }
}

impl From<std::io::Error> for CdcError {
    fn from(e: std::io::Error) -> Self {
        Self::unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(CdcError::auth("denied").is_fatal());
        assert!(CdcError::schema("no such column").is_fatal());
        assert!(CdcError::config("bad").is_fatal());
        assert!(!CdcError::row("bad value").is_fatal());
        assert!(!CdcError::decode("bad json").is_retryable());
        assert!(CdcError::unavailable("down").is_retryable());
    }

    #[test]
    fn context_keeps_kind() {
        let e = CdcError::unavailable("connection refused").with_context("table 'klines'");
        assert_eq!(e.kind(), ErrorKind::Unavailable);
        assert_eq!(e.message, "table 'klines': connection refused");
        assert_eq!(e.to_string(), "Unavailable: table 'klines': connection refused");
    }

    #[test]
    fn json_errors_are_decode_errors() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert_eq!(CdcError::from(err).kind(), ErrorKind::Decode);
    }
}
