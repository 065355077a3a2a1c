// Shared content domain types.

pub mod content_models;

pub use content_models::*;
