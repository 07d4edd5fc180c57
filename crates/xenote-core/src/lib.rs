//! Core types, config, errors, and wire protocol for the Xenote frame bridge.

pub mod config;
pub mod document;
pub mod error;
pub mod protocol;
