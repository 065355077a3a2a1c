pub mod pipeline_models;
pub mod pipeline_service;

pub use pipeline_models::*;
pub use pipeline_service::*;
