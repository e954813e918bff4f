//! Hive - 消息路由与智能体编排引擎
//!
//! 模块划分：
//! - **bus**: 入站/出站消息队列与按通道路由
//! - **session**: 会话历史与按会话串行的运行锁
//! - **agent**: 单次运行的状态机与消费入站消息的主循环
//! - **context**: 组装发给模型的对话
//! - **llm**: Provider 抽象与实现（OpenAI 兼容 / Mock / 脚本化）
//! - **tools**: 工具注册表、执行器与内置工具
//! - **memory**: 长期记忆与每日笔记
//! - **skills**: 技能目录
//! - **scheduler**: cron 任务与心跳触发器
//! - **channels**: 控制台与 Telegram 通道
//! - **core**: 错误、关闭、网关组装
//! - **config** / **observability**: 配置加载与日志

pub mod agent;
pub mod bus;
pub mod channels;
pub mod config;
pub mod context;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod scheduler;
pub mod session;
pub mod skills;
pub mod tools;

pub use crate::core::{AgentError, Gateway, GatewayBuilder, Running, ShutdownManager, ShutdownReason};
