pub mod apis;
pub mod config;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod reporting_window;
pub mod row;
pub mod sheet_appender;
