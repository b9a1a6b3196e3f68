pub mod tick_config;
pub mod time_manager;
