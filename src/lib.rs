//! Avatar Crew - 自主 Avatar 编排系统
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: avatar 档案、活动闸门、事件总线、渠道巡检与定时调度
//! - **generation**: 提示词模板、单轮工具循环、回复生成、回复过滤
//! - **integrations**: 渠道种类与连接器（Telegram 等）
//! - **llm**: 对话后端（本地 / 远程）、后端适配器、嵌入
//! - **memory**: 对话历史与知识库存储、检索、入库
//! - **observability**: 日志初始化
//! - **tools**: 工具注册表、执行器与内置工具

pub mod config;
pub mod core;
pub mod generation;
pub mod integrations;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;
