//! Channel trait: fetch raw records and send replies.

use async_trait::async_trait;

/// Error from an external channel operation.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Status {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("channel not configured: {0}")]
    NotConfigured(String),
}

/// Handle to an external messaging channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Channel id (e.g. "signal").
    fn id(&self) -> &str;

    /// Fetch the raw records received since the last call. An empty batch is not an error.
    async fn fetch_new_messages(&self) -> Result<Vec<String>, ChannelError>;

    /// Send a text message to a recipient (e.g. a phone number).
    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), ChannelError>;
}
