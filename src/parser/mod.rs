//! Message parsing: MIME attachment extraction and header decoding.

pub mod header;
pub mod mime;
