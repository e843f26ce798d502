//! Response queue and dispatcher: responses delivered by the transport are queued with
//! their resolved sender and sent back through the channel from the polling side.

use crate::channels::MessageChannel;
use crate::relay::correlator::PendingSenders;
use crate::relay::transport::Delivery;
use crate::relay::wire::RelayPayload;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A response ready to be delivered to an external sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub sender: String,
    pub text: String,
}

/// Create the unbounded FIFO queue between the delivery callback and the dispatcher.
pub fn response_queue() -> (
    mpsc::UnboundedSender<ResponseEnvelope>,
    mpsc::UnboundedReceiver<ResponseEnvelope>,
) {
    mpsc::unbounded_channel()
}

/// Transport-side half: resolves the sender of each response and enqueues it. Never blocks.
#[derive(Clone)]
pub struct ResponseRouter {
    pending: Arc<PendingSenders>,
    queue: mpsc::UnboundedSender<ResponseEnvelope>,
}

impl ResponseRouter {
    pub fn new(pending: Arc<PendingSenders>, queue: mpsc::UnboundedSender<ResponseEnvelope>) -> Self {
        Self { pending, queue }
    }

    /// Handle one delivered response. Returns true when it was queued.
    pub fn on_response(&self, delivery: Delivery) -> bool {
        let payload = RelayPayload::decode(&delivery.payload);
        log::info!("received response on {}: {}", delivery.topic, payload.text);
        let Some(sender) = self.pending.resolve(payload.id.as_deref()) else {
            log::debug!(
                "response on {} has no pending sender (id {:?}), dropping",
                delivery.topic,
                payload.id
            );
            return false;
        };
        self.queue
            .send(ResponseEnvelope {
                sender,
                text: payload.text,
            })
            .is_ok()
    }
}

/// Polling-side half: drains the queue and sends each response once.
pub struct Dispatcher {
    queue: mpsc::UnboundedReceiver<ResponseEnvelope>,
    channel: Arc<dyn MessageChannel>,
}

impl Dispatcher {
    pub fn new(queue: mpsc::UnboundedReceiver<ResponseEnvelope>, channel: Arc<dyn MessageChannel>) -> Self {
        Self { queue, channel }
    }

    /// Send everything currently queued. Failed sends are logged and dropped.
    /// Returns the number of responses delivered.
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(envelope) = self.queue.try_recv() {
            log::info!("sending queued response to {}: {}", envelope.sender, envelope.text);
            match self
                .channel
                .send_message(&envelope.sender, &envelope.text)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => log::warn!(
                    "{}: failed to send response to {}: {}",
                    self.channel.id(),
                    envelope.sender,
                    e
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct OutboxChannel {
        fail_for: Option<String>,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageChannel for OutboxChannel {
        fn id(&self) -> &str {
            "outbox"
        }

        async fn fetch_new_messages(&self) -> Result<Vec<String>, ChannelError> {
            Ok(Vec::new())
        }

        async fn send_message(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
            if self.fail_for.as_deref() == Some(recipient) {
                return Err(ChannelError::NotConfigured("unreachable".to_string()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn delivery(topic: &str, payload: &[u8]) -> Delivery {
        Delivery {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn plain_response_goes_to_latest_sender_whatever_the_topic() {
        let pending = Arc::new(PendingSenders::new());
        pending.record("S1");
        let (tx, mut rx) = response_queue();
        let router = ResponseRouter::new(pending, tx);
        assert!(router.on_response(delivery("alice_out", b"from alice")));
        assert!(router.on_response(delivery("bot_out", b"from bot")));
        assert_eq!(rx.try_recv().unwrap().sender, "S1");
        assert_eq!(rx.try_recv().unwrap().sender, "S1");
    }

    #[test]
    fn response_without_pending_sender_is_dropped() {
        let (tx, mut rx) = response_queue();
        let router = ResponseRouter::new(Arc::new(PendingSenders::new()), tx);
        assert!(!router.on_response(delivery("bot_out", b"nobody asked")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_response_with_id_is_dropped() {
        let pending = Arc::new(PendingSenders::new());
        let id = pending.record("+1");
        let (tx, mut rx) = response_queue();
        let router = ResponseRouter::new(pending, tx);
        let payload = RelayPayload::new(Some(id), "once").encode();
        assert!(router.on_response(delivery("bot_out", &payload)));
        assert!(!router.on_response(delivery("bot_out", &payload)));
        assert_eq!(rx.try_recv().unwrap().text, "once");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispatch_sends_in_order_and_drops_failures() {
        let channel = Arc::new(OutboxChannel {
            fail_for: Some("+2".to_string()),
            ..Default::default()
        });
        let (tx, rx) = response_queue();
        let mut dispatcher = Dispatcher::new(rx, channel.clone());
        for (sender, text) in [("+1", "a"), ("+2", "b"), ("+3", "c")] {
            tx.send(ResponseEnvelope {
                sender: sender.to_string(),
                text: text.to_string(),
            })
            .unwrap();
        }
        assert_eq!(dispatcher.dispatch_pending().await, 2);
        assert_eq!(dispatcher.dispatch_pending().await, 0);
        let sent = channel.sent.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                ("+1".to_string(), "a".to_string()),
                ("+3".to_string(), "c".to_string())
            ]
        );
    }
}
