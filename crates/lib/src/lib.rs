//! murmur core library: Signal bridge, MQTT relay, and Ollama-backed personality sessions
//! used by the `murmur` CLI.

pub mod bridge;
pub mod channels;
pub mod config;
pub mod init;
pub mod llm;
pub mod personality;
pub mod relay;
pub mod server;
pub mod session;
pub mod shutdown;
