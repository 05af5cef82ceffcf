pub mod application;
pub mod command;
pub mod config;
pub mod domain;
pub mod interfaces;
pub mod shared;

pub use shared::utils::init_tracing;
