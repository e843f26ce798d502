//! External messaging channels (e.g. Signal via signal-cli).
//!
//! A channel is polled for raw records, which are parsed into [`InboundMessage`]s, and
//! replies are sent back through [`MessageChannel::send_message`].

mod handle;
mod inbound;
mod signal;

pub use handle::{ChannelError, MessageChannel};
pub use inbound::{parse_record, InboundMessage};
pub use signal::SignalCliChannel;
