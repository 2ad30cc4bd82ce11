pub mod indexer;
pub mod metrics;
pub mod models;
pub mod sink;
pub mod utils;
