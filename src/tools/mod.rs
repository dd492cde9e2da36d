//! 工具层：Tool / TypedTool 抽象、注册表、执行器与内置工具（echo、沙箱文件系统）

pub mod echo;
pub mod executor;
pub mod filesystem;
pub mod registry;
pub mod schema;

pub use echo::EchoTool;
pub use executor::{ToolCall, ToolExecutor, ToolResult};
pub use filesystem::{register_filesystem_tools, SafeFs};
pub use registry::{Tool, ToolContext, ToolRegistry, TypedTool, TypedToolAdapter};
pub use schema::{empty_object_schema, schema_for_type, validate_against_schema};
