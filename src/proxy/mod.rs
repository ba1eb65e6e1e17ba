// Proxy failover module
// Author: kelexine (https://github.com/kelexine)

mod health;
pub mod strategy;

pub use health::{
    ProxyEndpoint, ProxyHealth, ProxyHealthManager, CHECK_INTERVAL, MAX_FAILURES, RECOVERY_TIME,
};
pub use strategy::ProxyStrategy;
