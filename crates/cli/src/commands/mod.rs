mod config;
mod demo;

pub use config::{cmd_config_init, cmd_config_show};
pub use demo::cmd_demo;
