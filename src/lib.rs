pub mod binance;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod sink;
pub mod source;
