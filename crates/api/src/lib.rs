//! HTTP facade over the bill actor registry.

pub mod app;
pub mod config;
