/// Per-frame protocol errors. Every variant is reported back to the client
/// as an `error` frame; none of them close the connection.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    Malformed(String),

    #[error("join required before {0}")]
    NotJoined(&'static str),
}

impl ProtocolError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::NotJoined(_) => "not_joined",
        }
    }
}
