//! Relay pipeline between an external channel and the personality server.
//!
//! Bridge side: [`ingress::poll_once`] parses inbound records, [`Correlator`] records the
//! sender and publishes the request, [`ResponseRouter`] matches responses back to senders
//! on the transport's delivery context, and [`Dispatcher`] sends them from the polling side.

pub mod correlator;
pub mod dispatcher;
pub mod ingress;
pub mod transport;
pub mod wire;

pub use correlator::{Correlator, PendingSenders};
pub use dispatcher::{response_queue, Dispatcher, ResponseEnvelope, ResponseRouter};
pub use ingress::poll_once;
pub use transport::{
    client_id, Delivery, DeliveryHandler, MqttConnection, MqttPublisher, Publisher, TransportError,
};
pub use wire::RelayPayload;
