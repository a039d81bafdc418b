//! Port traits for the collaborators the engine consumes.

pub mod config_port;
pub mod fundamentals_port;
pub mod price_port;
pub mod quote_port;
