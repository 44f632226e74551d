pub mod checkpoint;
pub mod config;
pub mod consumer;
pub mod error;
pub mod events;
pub mod feed;
pub mod http;
pub mod query;
pub mod repository;
pub mod rpc;
pub mod signal;
pub mod source;
pub mod store;
pub mod tracker;
