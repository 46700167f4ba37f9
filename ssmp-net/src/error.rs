use ssmp_codec::error::{DecodeError, EncodeError};
use ssmp_codec::RequestVerb;

#[derive(Debug, thiserror::Error)]
pub enum SsmpError {
    /// SSMP decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// SSMP encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// Write timeout
    #[error("Write timeout")]
    WriteTimeout,
    /// Flush timeout
    #[error("Flush timeout")]
    FlushTimeout,
    /// Close timeout
    #[error("Close timeout")]
    CloseTimeout,
    #[error("Connect timeout")]
    ConnectTimeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("login rejected, code: {0}")]
    LoginRejected(u16),
    #[error("no response is sent for {0}")]
    NoResponseExpected(RequestVerb),
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("invalid protocol")]
    InvalidProtocol,
}

impl SsmpError {
    /// Whether a failed operation was caused by the connection going away.
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, SsmpError::ConnectionClosed)
    }
}
