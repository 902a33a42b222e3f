/// Crate-wide error taxonomy: protocol, transport, resource, scanner,
/// component, and encoder errors.
///
/// Startup failures (listener bind, adapter construction) propagate with `?` up
/// to `main`. Per-connection and per-component failures are contained at their
/// boundary — logged and the session/component dropped — and never reach here.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("component {name} failed to initialize")]
    ComponentInit { name: &'static str },

    #[error("scanner unavailable: {0}")]
    ScannerUnavailable(String),
}

/// Errors raised by the varint/length-delimited codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("write would overflow the output buffer")]
    BufferExhausted,
    #[error("varint exceeds 64 significant bits")]
    VarintOverflow,
    #[error("buffer truncated before a complete value")]
    Truncated,
}

/// Errors raised while framing/deframing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("preamble byte was not 0x00")]
    InvalidPreamble,
    #[error("header incomplete, need more bytes")]
    TruncatedHeader,
    #[error("{0}")]
    Codec(CodecError),
}

impl From<CodecError> for FrameError {
    fn from(e: CodecError) -> Self {
        FrameError::Codec(e)
    }
}
