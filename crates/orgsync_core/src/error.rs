use thiserror::Error;

/// Failure classes surfaced by the sync operations.
///
/// Only `Configuration` and `UnknownStatus` abort an operation. The other
/// variants are recorded against the affected organization while the batch
/// carries on.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("lookup failed for {key}: {reason}")]
    Lookup { key: String, reason: String },

    #[error("upstream fetch failed for {target}: {reason}")]
    UpstreamFetch { target: String, reason: String },

    #[error("wiki write failed for {title}: {reason}")]
    WikiWrite { title: String, reason: String },

    #[error("unknown organization status `{status}` for {organization}")]
    UnknownStatus {
        organization: String,
        status: String,
    },
}

impl SyncError {
    pub fn lookup(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Lookup {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn upstream(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::UpstreamFetch {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn wiki_write(title: impl Into<String>, reason: impl ToString) -> Self {
        Self::WikiWrite {
            title: title.into(),
            reason: reason.to_string(),
        }
    }
}
