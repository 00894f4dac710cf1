pub mod api;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gitlog;
pub mod harvest;
pub mod heuristics;
pub mod identity;
pub mod models;
pub mod monitor;
pub mod pagination;
pub mod report;

#[cfg(test)]
mod testing;

pub use api::ApiClient;
pub use config::AnalyzerConfig;
pub use error::{ApiError, ApiErrorKind};
pub use models::Report;
pub use monitor::{Monitor, MonitorState};
pub use report::produce_report;
