//! modcache CLI - sync allow-listed module images with a local archive cache.

pub mod commands;
pub mod output;
