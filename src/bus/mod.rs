//! 消息总线：通道适配器与编排器之间的入站/出站队列

pub mod hub;
pub mod message;

pub use hub::{HubConfig, HubError, MessageHub};
pub use message::{InboundMessage, OutboundMessage, RunAck, HEARTBEAT_CHANNEL};
