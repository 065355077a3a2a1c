// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "cache/mod.rs"]
pub mod cache;

#[path = "vendors/mod.rs"]
pub mod vendors;
