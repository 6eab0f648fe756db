#![allow(dead_code)]

pub mod kitchen;
pub mod pipes;
pub mod strategies;

pub use kitchen::*;
pub use pipes::*;
pub use strategies::*;

use relay_core::RelayConfig;

/// Config with the logging observer detached so tests only see their own observers
pub fn quiet_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.observers.log_events = false;
    config
}
