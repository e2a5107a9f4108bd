//! Error types for the agent.
//!
//! Every variant is scoped to the command that raised it; none of them stop
//! the daemon.  `user_message` is what gets said back in chat.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The catalog returned nothing for the query.
    #[error("no matches for '{0}'")]
    NotFound(String),

    /// The reply to a choice list was not a listed number.
    #[error("invalid selection '{0}'")]
    InvalidSelection(String),

    /// Nobody answered the choice list in time.
    #[error("selection timed out after {0}s")]
    SelectionTimeout(u64),

    /// Retrieving one track failed; siblings in the same album keep going.
    #[error("failed to fetch '{title}': {reason}")]
    FetchFailure { title: String, reason: String },

    /// The choice list was dropped, e.g. by leaving the channel.
    #[error("selection cancelled")]
    SelectionCancelled,

    #[error("range {start}-{end} is outside the playlist of {len} tracks")]
    RangeInvalid { start: usize, end: usize, len: usize },

    /// Malformed command argument; carries the usage line.
    #[error("bad arguments, usage: {0}")]
    Usage(&'static str),

    #[error("not connected to a channel")]
    NotConnected,

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("sink error: {0}")]
    Sink(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn user_message(&self) -> String {
        match self {
            AgentError::NotFound(query) => format!("Nothing found for **{}**", query),
            AgentError::InvalidSelection(_) => "Nothing selected".to_string(),
            AgentError::SelectionTimeout(_) => "No choice received, search cancelled".to_string(),
            AgentError::SelectionCancelled => "Search cancelled".to_string(),
            AgentError::FetchFailure { title, .. } => format!("Could not download **{}**", title),
            AgentError::RangeInvalid { start, end, len } => format!(
                "Cannot remove tracks {} to {}: the playlist has {} tracks",
                start, end, len
            ),
            AgentError::Usage(usage) => format!("Usage: {}", usage),
            AgentError::NotConnected => "Not connected to a channel".to_string(),
            AgentError::Catalog(_) => "The music catalog is unavailable right now".to_string(),
            AgentError::Sink(_) => "Playback is unavailable right now".to_string(),
            AgentError::Io(_) => "Local storage error".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("catalog returned status {0}")]
    Status(u16),

    #[error("unknown id {0}")]
    UnknownId(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_message_names_bounds() {
        let err = AgentError::RangeInvalid {
            start: 3,
            end: 9,
            len: 4,
        };
        assert_eq!(
            err.user_message(),
            "Cannot remove tracks 3 to 9: the playlist has 4 tracks"
        );
        assert_eq!(
            err.to_string(),
            "range 3-9 is outside the playlist of 4 tracks"
        );
    }

    #[test]
    fn fetch_failure_mentions_title() {
        let err = AgentError::FetchFailure {
            title: "One More Time".into(),
            reason: "status 404".into(),
        };
        assert!(err.user_message().contains("One More Time"));
    }
}
