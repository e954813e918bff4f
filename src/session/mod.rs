//! 会话：历史与按键串行的运行锁

pub mod history;
pub mod registry;

pub use history::History;
pub use registry::{Admission, RunGuard, Session, SessionInfo, SessionKey, SessionRegistry};
