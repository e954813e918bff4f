//! Agent 编排：单次运行的状态机与消费入站消息的主循环

pub mod loop_;
pub mod run;

pub use loop_::{AgentLoop, BUSY_NOTICE, QUEUED_NOTICE};
pub use run::{AgentRunner, RunOutcome, RunState, RunnerConfig, EMPTY_REPLY};
