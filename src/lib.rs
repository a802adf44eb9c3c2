pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod locale;
pub mod manager;
pub mod operator;
pub mod pipeline;
pub mod recovery;
pub mod retry;
pub mod store;
