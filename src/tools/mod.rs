//! 工具箱：注册表、执行器与内置工具

pub mod cron;
pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod memory;
pub mod message;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod web;

pub use self::cron::CronTool;
pub use echo::EchoTool;
pub use executor::{ToolExecutor, ToolResult};
pub use filesystem::{ListDirTool, ReadFileTool, SafeFs, WriteFileTool};
pub use memory::WriteMemoryTool;
pub use message::MessageTool;
pub use registry::{Tool, ToolContext, ToolRegistry};
pub use schema::schema_of;
pub use shell::ShellTool;
pub use web::WebFetchTool;
