//! Core data model types.

pub mod attachment;
