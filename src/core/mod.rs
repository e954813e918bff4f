//! 核心层：错误分类、优雅关闭、网关组装

pub mod builder;
pub mod error;
pub mod shutdown;

pub use builder::{Gateway, GatewayBuilder, Running};
pub use error::AgentError;
pub use shutdown::{ShutdownManager, ShutdownReason};
