pub mod reload_script;
pub mod server;
