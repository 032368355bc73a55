use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Server error (Status: {status_code}): {details}")]
    Status { status_code: u16, details: String },

    #[error("Stream read failed: {details}")]
    Read { details: String },

    #[error("Invalid request: {details}")]
    InvalidRequest { details: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn read(details: impl Into<String>) -> Self {
        Self::Read {
            details: details.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::read(err.to_string())
    }
}
