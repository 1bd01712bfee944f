pub mod config;
pub mod data_stream;
pub mod extraction;
pub mod models;
pub mod service;
pub mod telemetry;

pub use config::{ConfigError, ServiceConfig};
pub use extraction::{DataUrl, ExtractionError, GeminiReportExtractor, ReportExtractor};
pub use service::{AppState, build_router, create_app, create_app_state};
