//! Schema module - Data model, configuration and notification types.

mod architecture;
mod config;
mod events;

pub use architecture::*;
pub use config::*;
pub use events::*;
