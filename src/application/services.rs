pub mod change_detector;
pub mod client_registry;
pub mod orchestrator;
