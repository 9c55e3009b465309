//! `popattach`: download attachments from a POP3 mailbox.
//!
//! The crate provides a small blocking POP3 client, MIME attachment
//! extraction, filename sanitization and the download workflow that ties
//! them together. The `popattach` binary wraps it in a CLI.

pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod parser;
pub mod pop3;
pub mod report;
pub mod workflow;
