//! MQTT transport: publish payloads to topics and deliver subscribed messages to a callback.
//!
//! Each [`MqttConnection`] owns one broker connection. Its event loop runs on a dedicated
//! task (the delivery context); subscriptions are reissued on every ConnAck so they survive
//! reconnects. The delivery callback runs on that task and must return quickly.

use crate::config::BrokerConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const REQUEST_CHANNEL_CAPACITY: usize = 64;
const MAX_PACKET_SIZE: usize = 256 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection to {broker} failed: {source}")]
    Connection {
        broker: String,
        #[source]
        source: rumqttc::ConnectionError,
    },
    #[error("timed out connecting to {0}")]
    Timeout(String),
}

/// Publishes payloads to topics.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

/// A message delivered on a subscribed topic.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Callback invoked on the delivery context for each incoming message.
pub type DeliveryHandler = Arc<dyn Fn(Delivery) + Send + Sync>;

/// Build a client id unique to this process (`<prefix>-<role>-<short uuid>`).
pub fn client_id(prefix: &str, role: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, role, &suffix[..8])
}

fn mqtt_options(client_id: &str, broker: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(client_id, broker.host.clone(), broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs.max(5)));
    options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
    options
}

/// One live broker connection.
pub struct MqttConnection {
    client: AsyncClient,
    broker: String,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MqttConnection {
    /// Connect, wait for the broker's ConnAck, subscribe to `topics`, then spawn the event loop.
    /// Failing to reach the broker here is an error; later connection errors are logged and retried.
    pub async fn connect(
        client_id: &str,
        broker: &BrokerConfig,
        topics: Vec<String>,
        on_delivery: Option<DeliveryHandler>,
    ) -> Result<Self, TransportError> {
        let broker_addr = format!("{}:{}", broker.host, broker.port);
        let (client, mut eventloop) =
            AsyncClient::new(mqtt_options(client_id, broker), REQUEST_CHANNEL_CAPACITY);

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        log::info!("mqtt {}: connected ({:?})", broker_addr, ack.code);
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(source) => {
                        return Err(TransportError::Connection {
                            broker: broker_addr.clone(),
                            source,
                        })
                    }
                }
            }
        })
        .await;
        match connected {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(broker_addr)),
        }
        subscribe_all(&client, &topics)?;

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(run_event_loop(
            eventloop,
            client.clone(),
            broker_addr.clone(),
            topics,
            on_delivery,
            running.clone(),
        ));
        Ok(Self {
            client,
            broker: broker_addr,
            running,
            task,
        })
    }

    /// Disconnect from the broker and stop the event loop.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            log::debug!("mqtt {}: disconnect: {}", self.broker, e);
        }
        self.task.abort();
        let _ = self.task.await;
        log::info!("mqtt {}: disconnected", self.broker);
    }

    /// Publisher handle sharing this connection.
    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
        }
    }
}

fn subscribe_all(client: &AsyncClient, topics: &[String]) -> Result<(), TransportError> {
    for topic in topics {
        client.try_subscribe(topic.as_str(), QoS::AtLeastOnce)?;
        log::info!("mqtt: subscribed to {}", topic);
    }
    Ok(())
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    broker: String,
    topics: Vec<String>,
    on_delivery: Option<DeliveryHandler>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::SeqCst) {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                log::debug!(
                    "mqtt {}: message on {} ({} bytes)",
                    broker,
                    publish.topic,
                    publish.payload.len()
                );
                if let Some(handler) = &on_delivery {
                    handler(Delivery {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                    });
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                log::info!("mqtt {}: reconnected", broker);
                if let Err(e) = subscribe_all(&client, &topics) {
                    log::warn!("mqtt {}: resubscribe failed: {}", broker, e);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                log::info!("mqtt {}: broker sent disconnect", broker);
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                log::warn!("mqtt {}: connection error: {}", broker, e);
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
    log::debug!("mqtt {}: event loop stopped", broker);
}

/// Publisher backed by an MQTT client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}
