//! lyxcode - 浏览器内开发工作区的核心库
//!
//! 模块结构：
//! - models: 数据模型（PathTable, Vfs, TreeBlob）
//! - kernel: 行为（会话、编译、沙箱运行、shell、工作区）
//! - kernel::services: 端口与适配器（项目存储、设置、数据目录）

pub mod kernel;
pub mod models;
