//! Error types for the sync and answer pipeline.
//!
//! None of these are fatal to the process. Transport failures degrade to a
//! fallback corpus, a placeholder string, or a fixed apology; a sync conflict
//! is reported to the admin caller as a structured rejection.

use thiserror::Error;

/// The document store or completion model was unreachable or answered non-2xx.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl TransportError {
    pub(crate) fn request(url: &str, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn decode(url: &str, reason: impl Into<String>) -> Self {
        Self::Decode {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}

/// Rejection returned by a sync trigger.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("already running")]
    AlreadyRunning,
}

/// Failure to assemble a corpus snapshot.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Informational: the listing worked but yielded no text.
    #[error("corpus folder '{0}' has no readable documents")]
    Empty(String),
}

/// Failure converting one local PDF.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot extract text from {path}: {reason}")]
    Pdf { path: String, reason: String },
}
