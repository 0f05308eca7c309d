pub mod config;
pub mod device_models;
pub mod error;
pub mod state;
