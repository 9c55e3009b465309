//! Attachment extracted from a retrieved message.

/// One MIME part carrying a Content-Disposition, with its decoded payload.
///
/// The filename is the decoded name as declared by the sender. It is not
/// safe for the filesystem until it has gone through
/// [`crate::export::attachment::safe_filename`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Declared filename after charset decoding. Generated if missing.
    pub filename: String,

    /// MIME content type (e.g. `"application/pdf"`).
    pub content_type: String,

    /// Transfer-decoded payload bytes.
    pub data: Vec<u8>,

    /// Why the declared filename could not be decoded. `filename` then
    /// holds the raw header value.
    pub filename_error: Option<String>,
}

impl Attachment {
    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
