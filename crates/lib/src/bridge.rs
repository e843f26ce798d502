//! Bridge process: Signal ⇄ MQTT.
//!
//! Two independent scheduling contexts: the MQTT event loop delivers responses to the
//! [`ResponseRouter`], and timer-driven loops poll the channel and drain the response
//! queue. They share nothing but the queue and the pending-sender table.

use crate::channels::{MessageChannel, SignalCliChannel};
use crate::config::{self, BridgeConfig, Config};
use crate::relay::{
    client_id, poll_once, response_queue, Correlator, DeliveryHandler, Dispatcher, MqttConnection,
    PendingSenders, ResponseRouter,
};
use crate::shutdown;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Spawn the ingress loop: poll the channel, then relay each parsed message in order.
pub fn spawn_ingress_loop(
    channel: Arc<dyn MessageChannel>,
    correlator: Correlator,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        log::info!("{}: polling every {:?}", channel.id(), poll_interval);
        while running.load(Ordering::SeqCst) {
            let batch = poll_once(channel.as_ref()).await;
            if !batch.is_empty() {
                correlator.relay_all(&batch).await;
            }
            tokio::time::sleep(poll_interval).await;
        }
        log::info!("{}: ingress loop stopped", channel.id());
    })
}

/// Spawn the dispatch loop: drain the response queue at a fixed interval.
pub fn spawn_dispatch_loop(
    mut dispatcher: Dispatcher,
    interval: Duration,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while running.load(Ordering::SeqCst) {
            ticker.tick().await;
            dispatcher.dispatch_pending().await;
        }
        log::info!("dispatch loop stopped");
    })
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Loop timings derived from config (intervals are clamped to at least 10 ms).
pub fn loop_timings(bridge: &BridgeConfig) -> (Duration, Duration, Duration) {
    (
        millis(bridge.poll_interval_ms.max(10)),
        millis(bridge.grace_period_ms),
        millis(bridge.dispatch_interval_ms.max(10)),
    )
}

/// Run the bridge until SIGINT/SIGTERM.
/// Connects to the response broker (subscribed to the response topic) and the request broker,
/// then polls signal-cli and relays messages.
pub async fn run_bridge(config: Config) -> Result<()> {
    let account = config::resolve_signal_account(&config).context(
        "no Signal account configured (set channels.signal.account or PHONE_NUMBER_BOT)",
    )?;
    log::info!("starting Signal-MQTT bridge for {}", account);
    let channel: Arc<dyn MessageChannel> = Arc::new(SignalCliChannel::new(
        config.channels.signal.cli_path.clone(),
        Some(account),
    ));

    let pending = Arc::new(PendingSenders::with_capacity(
        config.bridge.max_pending_requests,
    ));
    let (queue_tx, queue_rx) = response_queue();
    let router = ResponseRouter::new(pending.clone(), queue_tx);
    let on_response: DeliveryHandler = Arc::new(move |delivery| {
        router.on_response(delivery);
    });

    let prefix = config.broker.client_id_prefix.as_str();
    let receiver = MqttConnection::connect(
        &client_id(prefix, "bridge-rx"),
        &config.broker.response,
        vec![config.bridge.response_topic.clone()],
        Some(on_response),
    )
    .await
    .context("connecting to response broker")?;
    let sender = MqttConnection::connect(
        &client_id(prefix, "bridge-tx"),
        &config.broker.request,
        Vec::new(),
        None,
    )
    .await
    .context("connecting to request broker")?;

    let (poll_interval, grace_period, dispatch_interval) = loop_timings(&config.bridge);
    let correlator = Correlator::new(
        pending,
        Arc::new(sender.publisher()),
        config.bridge.request_topic.clone(),
        grace_period,
    );
    let running = shutdown::running_flag();
    let handles = vec![
        spawn_dispatch_loop(
            Dispatcher::new(queue_rx, channel.clone()),
            dispatch_interval,
            running.clone(),
        ),
        spawn_ingress_loop(channel, correlator, poll_interval, running.clone()),
    ];
    log::info!(
        "bridge running: requests -> {}, responses <- {}",
        config.bridge.request_topic,
        config.bridge.response_topic
    );

    shutdown::shutdown_signal().await;
    shutdown::stop_tasks(&running, handles).await;
    sender.shutdown().await;
    receiver.shutdown().await;
    log::info!("bridge stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelError;
    use crate::relay::{Publisher, RelayPayload, ResponseEnvelope, TransportError};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Channel that yields one batch on the first poll and records sends.
    #[derive(Default)]
    struct ScriptedChannel {
        polls: AtomicUsize,
        sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessageChannel for ScriptedChannel {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn fetch_new_messages(&self) -> Result<Vec<String>, ChannelError> {
            if self.polls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(vec![
                    "Envelope from: Ada +15551234567 (device: 1) to +15550000000\nBody: ping"
                        .to_string(),
                ]);
            }
            Ok(Vec::new())
        }

        async fn send_message(&self, recipient: &str, text: &str) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((recipient.to_string(), text.to_string()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push((topic.to_string(), payload));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn loops_relay_and_dispatch_until_stopped() {
        let channel = Arc::new(ScriptedChannel::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let pending = Arc::new(PendingSenders::new());
        let correlator = Correlator::new(pending, publisher.clone(), "bot_in", Duration::ZERO);
        let (tx, rx) = response_queue();
        let running = shutdown::running_flag();

        let ingress = spawn_ingress_loop(
            channel.clone(),
            correlator,
            Duration::from_millis(100),
            running.clone(),
        );
        let dispatch = spawn_dispatch_loop(
            Dispatcher::new(rx, channel.clone()),
            Duration::from_millis(10),
            running.clone(),
        );
        tx.send(ResponseEnvelope {
            sender: "+15551234567".to_string(),
            text: "pong".to_string(),
        })
        .unwrap();

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert!(channel.polls.load(Ordering::SeqCst) >= 3);
        {
            let published = publisher.sent.lock().unwrap();
            assert_eq!(published.len(), 1);
            assert_eq!(published[0].0, "bot_in");
            assert_eq!(RelayPayload::decode(&published[0].1).text, "ping");
        }
        assert_eq!(
            *channel.sent.lock().unwrap(),
            vec![("+15551234567".to_string(), "pong".to_string())]
        );

        running.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(1), ingress)
            .await
            .expect("ingress loop stops")
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), dispatch)
            .await
            .expect("dispatch loop stops")
            .unwrap();
        assert!(tx
            .send(ResponseEnvelope {
                sender: "+1".to_string(),
                text: "late".to_string(),
            })
            .is_err());
        let polls = channel.polls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(channel.polls.load(Ordering::SeqCst), polls);
    }

    #[test]
    fn loop_timings_clamp_intervals() {
        let bridge = BridgeConfig {
            poll_interval_ms: 0,
            grace_period_ms: 0,
            dispatch_interval_ms: 1,
            ..BridgeConfig::default()
        };
        let (poll, grace, dispatch) = loop_timings(&bridge);
        assert_eq!(poll, Duration::from_millis(10));
        assert_eq!(grace, Duration::ZERO);
        assert_eq!(dispatch, Duration::from_millis(10));
    }
}
