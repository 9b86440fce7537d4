//! Application services over the cache-aware query surface.

pub mod cafes;
pub mod error;
pub mod repos;
pub mod users;
