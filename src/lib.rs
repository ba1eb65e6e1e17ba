// repolens - resilient content access for Git hosting APIs
// Author: kelexine (https://github.com/kelexine)

pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod github;
pub mod metrics;
pub mod proxy;
pub mod search;
pub mod server;
pub mod service;
pub mod utils;
