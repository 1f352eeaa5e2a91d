//! Taskflow Library
//!
//! This module exports the core components for testing and integration.

pub mod api;
pub mod blob;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod types;
