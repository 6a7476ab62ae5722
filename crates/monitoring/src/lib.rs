//! Logging setup shared by the tracker services.

pub mod logging;

pub use logging::init_logging;
