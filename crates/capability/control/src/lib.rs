//! # IGW Control 模块
//!
//! - `supervisor`：采集句柄生命周期、轮询调度、状态泵、启动重放与优雅关闭
//! - `data_service`：管理接口的数据写入、查询、统计、清理与导出

pub mod data_service;
pub mod error;
pub mod supervisor;

pub use data_service::{CSV_HEADER, CleanupResult, DataService, DataStats, export_csv, export_json};
pub use error::{DataServiceError, SupervisorError};
pub use supervisor::{
    ConnectionStatusView, HandleInfo, MIN_POLL_INTERVAL, ReplaySummary, Supervisor,
    SupervisorConfig,
};
