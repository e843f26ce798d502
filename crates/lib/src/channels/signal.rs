//! Signal channel: polls `signal-cli receive` and replies with `signal-cli send`.
//! No shell is used; arguments are passed as a list.

use crate::channels::handle::{ChannelError, MessageChannel};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;

/// signal-cli connector bound to one registered account.
pub struct SignalCliChannel {
    id: String,
    cli_path: PathBuf,
    account: Option<String>,
}

impl SignalCliChannel {
    pub fn new(cli_path: impl Into<PathBuf>, account: Option<String>) -> Self {
        Self {
            id: "signal".to_string(),
            cli_path: cli_path.into(),
            account,
        }
    }

    /// Run `signal-cli -u <account> <args...>` and return stdout. Non-zero exit is an error.
    async fn run(&self, args: &[&str]) -> Result<String, ChannelError> {
        let account = self
            .account
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("signal account".to_string()))?;
        let command = format!("{} {}", self.cli_path.display(), args.first().unwrap_or(&""));
        let output = Command::new(&self.cli_path)
            .arg("-u")
            .arg(account)
            .args(args)
            .output()
            .await
            .map_err(|source| ChannelError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(ChannelError::Status {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Split `signal-cli receive` output into records (separated by a blank line).
pub(crate) fn split_records(stdout: &str) -> Vec<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed
        .replace("\r\n", "\n")
        .split("\n\n")
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl MessageChannel for SignalCliChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn fetch_new_messages(&self) -> Result<Vec<String>, ChannelError> {
        let stdout = self.run(&["receive"]).await?;
        let records = split_records(&stdout);
        if records.is_empty() {
            log::debug!("signal: no new messages");
        }
        Ok(records)
    }

    async fn send_message(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
        self.run(&["send", "-m", text, recipient]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_records_on_blank_lines() {
        let out = "Envelope from: a +1 (device: 1) to +2\nBody: one\n\nEnvelope from: b +3 (device: 1) to +2\nBody: two\n";
        let records = split_records(out);
        assert_eq!(records.len(), 2);
        assert!(records[0].ends_with("Body: one"));
        assert!(records[1].ends_with("Body: two"));
    }

    #[test]
    fn split_records_empty_output() {
        assert!(split_records("").is_empty());
        assert!(split_records("  \n\n ").is_empty());
    }

    #[tokio::test]
    async fn missing_account_is_not_configured() {
        let channel = SignalCliChannel::new("/usr/local/bin/signal-cli", None);
        let err = channel.fetch_new_messages().await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let channel = SignalCliChannel::new(
            "/nonexistent/signal-cli-for-tests",
            Some("+15550000000".to_string()),
        );
        let err = channel.send_message("+15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_status_error() {
        let channel = SignalCliChannel::new("false", Some("+15550000000".to_string()));
        let err = channel.send_message("+15551234567", "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::Status { .. }));
    }
}
