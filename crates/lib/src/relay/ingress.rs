//! Ingress polling: fetch one batch from the channel and parse it.

use crate::channels::{parse_record, InboundMessage, MessageChannel};

/// Fetch and parse one batch. Fetch failures are logged and yield an empty batch;
/// records without an envelope sender or a body are skipped.
pub async fn poll_once(channel: &dyn MessageChannel) -> Vec<InboundMessage> {
    let records = match channel.fetch_new_messages().await {
        Ok(records) => records,
        Err(e) => {
            log::warn!("{}: failed to receive messages: {}", channel.id(), e);
            return Vec::new();
        }
    };
    records
        .iter()
        .filter_map(|raw| {
            let parsed = parse_record(raw);
            if parsed.is_none() {
                log::debug!("{}: skipping record without sender/body", channel.id());
            }
            parsed
        })
        .collect()
}
