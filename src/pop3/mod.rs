//! POP3 mailbox access: the [`Mailbox`] seam used by the workflow and the
//! blocking client that implements it.

pub mod client;

use serde::Serialize;

use crate::error::Result;

pub use client::Pop3Session;

/// Default POP3 port (RFC 1939).
pub const DEFAULT_PORT: u16 = 110;

/// A message number and its size in octets, as reported by LIST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MessageRef {
    pub number: u32,
    pub size: u64,
}

/// STAT response: message count and total mailbox size in octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MailboxStat {
    pub count: u32,
    pub total_size: u64,
}

/// Operations the download workflow needs from an authenticated mailbox.
///
/// `quit` consumes the mailbox, so a session can be closed at most once.
pub trait Mailbox {
    /// Message count and total size.
    fn stat(&mut self) -> Result<MailboxStat>;

    /// Every message number with its size, in server order.
    fn list(&mut self) -> Result<Vec<MessageRef>>;

    /// The raw RFC 5322 bytes of one message.
    fn retrieve(&mut self, number: u32) -> Result<Vec<u8>>;

    /// Mark one message for deletion. The server expunges it on QUIT.
    fn delete(&mut self, number: u32) -> Result<()>;

    /// End the session and release the connection.
    fn quit(self) -> Result<()>
    where
        Self: Sized;
}
