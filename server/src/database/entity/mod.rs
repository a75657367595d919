//! Database entities.

pub mod cache;
pub mod download;
pub mod package;
