//! The download run: list the mailbox, extract attachments from each
//! message, optionally delete, and always close the session.
//!
//! ```text
//! Idle → Connected → Listing → Processing(0..n) → Done
//!            └──────────┴──────────────→ Failed
//! ```
//!
//! Setup failures (connect, login, STAT, LIST) end the run, and so does a
//! lost connection at any point. A `-ERR` for one message, an unparsable
//! message or a failed save is reported and the loop moves on.

use std::path::PathBuf;

use humansize::{format_size, BINARY};
use serde::Serialize;
use tracing::Level;

use crate::config::ApplicationConfig;
use crate::error::{Error, Result};
use crate::export::attachment::{safe_filename, save_attachment};
use crate::parser::mime::parse_attachments;
use crate::pop3::{Mailbox, MessageRef, Pop3Session};
use crate::report::{LogContext, Reporter};

/// Where the run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunState {
    #[default]
    Idle,
    Connected,
    Listing,
    /// Handling the message at this position of the LIST result (0-based).
    Processing(usize),
    Done,
    Failed,
}

/// What a run needs besides the mailbox itself.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Directory attachments are written to.
    pub save_folder: PathBuf,
    /// Delete a message once all of its attachments are saved.
    pub delete_processed: bool,
}

impl From<&ApplicationConfig> for RunSettings {
    fn from(config: &ApplicationConfig) -> Self {
        Self {
            save_folder: config.save_folder.clone(),
            delete_processed: config.delete_proceeded,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Messages reported by LIST.
    pub messages: usize,
    /// Messages retrieved and parsed.
    pub processed: usize,
    /// Messages skipped because RETR or parsing failed.
    pub failed: usize,
    /// Messages marked for deletion.
    pub deleted: usize,
    pub attachments_saved: usize,
    pub attachments_failed: usize,
    /// Files written, in order.
    pub saved_paths: Vec<PathBuf>,
    pub final_state: RunState,
}

/// Open a session to the configured server and run the download.
pub fn download_attachments(
    config: &ApplicationConfig,
    user: &str,
    password: &str,
    reporter: &dyn Reporter,
    progress: &dyn Fn(usize, usize),
) -> Result<RunSummary> {
    reporter.log(
        Level::INFO,
        &format!("Preparing attachment download from {}", config.mailserver),
        &LogContext::default(),
    );

    let session = match Pop3Session::open(&config.mailserver, user, password) {
        Ok(session) => session,
        Err(e) => {
            reporter.log(
                Level::ERROR,
                "Could not open POP3 session",
                &LogContext::default().with_error(&e),
            );
            return Err(e);
        }
    };
    reporter.log(
        Level::DEBUG,
        &format!("Connected to {} as {user}", config.mailserver),
        &LogContext::default(),
    );

    run(session, &RunSettings::from(config), reporter, progress)
}

/// Process every message of an open mailbox, then close it.
///
/// The mailbox is closed exactly once, whether or not the run succeeds.
/// `progress` receives `(current, total)` message counts.
pub fn run<M: Mailbox>(
    mailbox: M,
    settings: &RunSettings,
    reporter: &dyn Reporter,
    progress: &dyn Fn(usize, usize),
) -> Result<RunSummary> {
    let mut run = Run {
        mailbox,
        settings,
        reporter,
        summary: RunSummary::default(),
        state: RunState::Idle,
    };
    run.transition(RunState::Connected);

    let result = run.process_mailbox(progress);
    run.transition(if result.is_ok() {
        RunState::Done
    } else {
        RunState::Failed
    });

    let Run {
        mailbox,
        reporter,
        mut summary,
        state,
        ..
    } = run;
    summary.final_state = state;
    reporter.log(
        Level::DEBUG,
        &format!("Run finished in state {state:?}"),
        &LogContext::default(),
    );

    match mailbox.quit() {
        Ok(()) => reporter.log(
            Level::DEBUG,
            "Connection to POP3 server is closed",
            &LogContext::default(),
        ),
        // Deletions are only committed by a successful QUIT.
        Err(e) if summary.deleted > 0 => reporter.log(
            Level::ERROR,
            &format!(
                "QUIT failed, {} deletion(s) may not have been committed",
                summary.deleted
            ),
            &LogContext::default().with_error(&e),
        ),
        Err(e) => reporter.log(
            Level::WARN,
            "QUIT failed",
            &LogContext::default().with_error(&e),
        ),
    }

    result.map(|()| summary)
}

struct Run<'a, M> {
    mailbox: M,
    settings: &'a RunSettings,
    reporter: &'a dyn Reporter,
    summary: RunSummary,
    state: RunState,
}

impl<M: Mailbox> Run<'_, M> {
    fn transition(&mut self, next: RunState) {
        tracing::trace!(from = ?self.state, to = ?next, "Run state");
        self.state = next;
    }

    fn log(&self, level: Level, message: &str, context: &LogContext) {
        self.reporter.log(level, message, context);
    }

    fn process_mailbox(&mut self, progress: &dyn Fn(usize, usize)) -> Result<()> {
        self.transition(RunState::Listing);

        let stat = self.mailbox.stat().inspect_err(|e| {
            self.log(
                Level::ERROR,
                "Error reading mailbox status",
                &LogContext::default().with_error(e),
            );
        })?;
        self.log(
            Level::DEBUG,
            &format!(
                "Mailbox has {} messages, total size {}",
                stat.count,
                format_size(stat.total_size, BINARY)
            ),
            &LogContext::default(),
        );

        let messages = self.mailbox.list().inspect_err(|e| {
            self.log(
                Level::ERROR,
                "Error downloading mail list",
                &LogContext::default().with_error(e),
            );
        })?;
        self.summary.messages = messages.len();

        let total = messages.len();
        for (i, message) in messages.into_iter().enumerate() {
            self.transition(RunState::Processing(i));
            progress(i, total);
            self.process_message(message, total)?;
        }
        progress(total, total);

        if total > 0 {
            self.log(
                Level::INFO,
                &format!(
                    "Attachments downloaded: {} saved, {} failed, from {} message(s)",
                    self.summary.attachments_saved, self.summary.attachments_failed, total
                ),
                &LogContext::default(),
            );
        } else {
            self.log(
                Level::INFO,
                "There are no new messages",
                &LogContext::default(),
            );
        }
        Ok(())
    }

    /// Handle one message. Per-message problems are reported and counted;
    /// only errors that leave the session unusable are returned.
    fn process_message(&mut self, message: MessageRef, total: usize) -> Result<()> {
        let ctx = LogContext::message(message.number);
        self.log(
            Level::INFO,
            &format!(
                "Processing message No.{}/{} ({})",
                message.number,
                total,
                format_size(message.size, BINARY)
            ),
            &ctx,
        );

        let raw = match self.mailbox.retrieve(message.number) {
            Ok(raw) => raw,
            Err(e @ Error::Protocol { .. }) => {
                self.log(
                    Level::ERROR,
                    "Error retrieving message",
                    &ctx.clone().with_error(&e),
                );
                self.summary.failed += 1;
                return Ok(());
            }
            Err(e) => {
                self.log(
                    Level::ERROR,
                    "Lost connection while retrieving message",
                    &ctx.clone().with_error(&e),
                );
                return Err(e);
            }
        };

        let attachments = match parse_attachments(&raw) {
            Ok(attachments) => attachments,
            Err(e) => {
                self.log(
                    Level::ERROR,
                    "Error parsing message",
                    &ctx.clone().with_error(&e),
                );
                self.summary.failed += 1;
                return Ok(());
            }
        };
        self.summary.processed += 1;
        self.log(
            Level::DEBUG,
            &format!("Found {} attachment(s)", attachments.len()),
            &ctx,
        );

        let mut all_saved = true;
        for (i, attachment) in attachments.iter().enumerate() {
            let filename = safe_filename(&attachment.filename, i + 1);
            let att_ctx = ctx.clone().with_filename(filename.as_str());
            if let Some(error) = &attachment.filename_error {
                self.log(
                    Level::WARN,
                    "Undecodable filename, using raw value",
                    &ctx.clone()
                        .with_filename(attachment.filename.as_str())
                        .with_error(error),
                );
            }
            self.log(
                Level::DEBUG,
                &format!(
                    "Attachment '{}' ({}, {} bytes) saved as '{filename}'",
                    attachment.filename,
                    attachment.content_type,
                    attachment.size()
                ),
                &att_ctx,
            );

            match save_attachment(&attachment.data, &filename, &self.settings.save_folder) {
                Ok(path) => {
                    self.log(
                        Level::INFO,
                        "Attached file was saved",
                        &att_ctx.with_path(&path),
                    );
                    self.summary.attachments_saved += 1;
                    self.summary.saved_paths.push(path);
                }
                Err(e) => {
                    self.log(
                        Level::ERROR,
                        "Could not save attachment",
                        &att_ctx.with_error(&e),
                    );
                    self.summary.attachments_failed += 1;
                    all_saved = false;
                }
            }
        }

        if !self.settings.delete_processed {
            return Ok(());
        }
        if attachments.is_empty() {
            self.log(
                Level::DEBUG,
                "No attachments, message kept on server",
                &ctx,
            );
        } else if !all_saved {
            self.log(
                Level::WARN,
                "Message kept on server because an attachment could not be saved",
                &ctx,
            );
        } else {
            match self.mailbox.delete(message.number) {
                Ok(()) => {
                    self.log(Level::INFO, "Message was deleted from server", &ctx);
                    self.summary.deleted += 1;
                }
                Err(e @ Error::Protocol { .. }) => self.log(
                    Level::ERROR,
                    "Could not delete message",
                    &ctx.clone().with_error(&e),
                ),
                Err(e) => {
                    self.log(
                        Level::ERROR,
                        "Lost connection while deleting message",
                        &ctx.clone().with_error(&e),
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;
    use crate::pop3::MailboxStat;
    use crate::report::MemoryReporter;

    /// Server-side state shared between a test and its [`FakeMailbox`].
    #[derive(Default)]
    struct Server {
        messages: BTreeMap<u32, Vec<u8>>,
        failing_retr: Vec<u32>,
        /// The connection drops when this message is retrieved.
        eof_on: Option<u32>,
        fail_list: bool,
        retrieved: Vec<u32>,
        deleted: Vec<u32>,
        quits: usize,
    }

    struct FakeMailbox(Rc<RefCell<Server>>);

    impl Mailbox for FakeMailbox {
        fn stat(&mut self) -> Result<MailboxStat> {
            let server = self.0.borrow();
            Ok(MailboxStat {
                count: server.messages.len() as u32,
                total_size: server.messages.values().map(|m| m.len() as u64).sum(),
            })
        }

        fn list(&mut self) -> Result<Vec<MessageRef>> {
            let server = self.0.borrow();
            if server.fail_list {
                return Err(Error::protocol("LIST", "-ERR mailbox locked"));
            }
            Ok(server
                .messages
                .iter()
                .map(|(&number, m)| MessageRef {
                    number,
                    size: m.len() as u64,
                })
                .collect())
        }

        fn retrieve(&mut self, number: u32) -> Result<Vec<u8>> {
            let mut server = self.0.borrow_mut();
            server.retrieved.push(number);
            if server.failing_retr.contains(&number) {
                return Err(Error::protocol("RETR", "-ERR no such message"));
            }
            if server.eof_on == Some(number) {
                return Err(Error::UnexpectedEof);
            }
            Ok(server.messages[&number].clone())
        }

        fn delete(&mut self, number: u32) -> Result<()> {
            self.0.borrow_mut().deleted.push(number);
            Ok(())
        }

        fn quit(self) -> Result<()> {
            self.0.borrow_mut().quits += 1;
            Ok(())
        }
    }

    fn with_attachment(name: &str, body: &str) -> Vec<u8> {
        format!(
            "Subject: test\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
body\r\n\
--b\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"{name}\"\r\n\
\r\n\
{body}\r\n\
--b--\r\n"
        )
        .into_bytes()
    }

    fn fixture(messages: Vec<Vec<u8>>) -> Rc<RefCell<Server>> {
        let server = Server {
            messages: messages
                .into_iter()
                .enumerate()
                .map(|(i, m)| (i as u32 + 1, m))
                .collect(),
            ..Server::default()
        };
        Rc::new(RefCell::new(server))
    }

    fn settings(folder: &std::path::Path, delete: bool) -> RunSettings {
        RunSettings {
            save_folder: folder.to_path_buf(),
            delete_processed: delete,
        }
    }

    #[test]
    fn test_report_attachment_is_saved_under_sanitized_name() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(vec![with_attachment("Report (final)!.pdf", "PDF")]);
        let reporter = MemoryReporter::new();

        let summary = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), false),
            &reporter,
            &|_, _| {},
        )
        .unwrap();

        let expected = dir.path().join("report..final...pdf");
        assert_eq!(summary.saved_paths, vec![expected.clone()]);
        assert_eq!(std::fs::read(expected).unwrap(), b"PDF");
        assert_eq!(summary.final_state, RunState::Done);
        assert!(reporter.contains(Level::DEBUG, "state Done"));
        assert_eq!(server.borrow().quits, 1);
        assert!(server.borrow().deleted.is_empty());
    }

    #[test]
    fn test_empty_mailbox() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let server = fixture(vec![]);
        let reporter = MemoryReporter::new();

        let summary = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(&out, true),
            &reporter,
            &|_, _| {},
        )
        .unwrap();

        assert_eq!(summary.messages, 0);
        assert!(reporter.contains(Level::INFO, "no new messages"));
        assert_eq!(server.borrow().quits, 1);
        assert!(!out.exists());
    }

    #[test]
    fn test_retrieval_error_skips_only_that_message() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(
            (1..=5)
                .map(|i| with_attachment(&format!("file{i}.txt"), &format!("content {i}")))
                .collect(),
        );
        server.borrow_mut().failing_retr.push(3);
        let reporter = MemoryReporter::new();

        let summary = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), false),
            &reporter,
            &|_, _| {},
        )
        .unwrap();

        assert_eq!(server.borrow().retrieved, vec![1, 2, 3, 4, 5]);
        assert_eq!(summary.processed, 4);
        assert_eq!(summary.failed, 1);
        for i in [1, 2, 4, 5] {
            assert!(dir.path().join(format!("file{i}.txt")).exists());
        }
        assert!(!dir.path().join("file3.txt").exists());

        let errors = reporter.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context.message, Some(3));
        assert_eq!(server.borrow().quits, 1);
    }

    #[test]
    fn test_lost_connection_ends_run_and_closes_once() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(
            (1..=5)
                .map(|i| with_attachment(&format!("file{i}.txt"), &format!("content {i}")))
                .collect(),
        );
        server.borrow_mut().eof_on = Some(2);
        let reporter = MemoryReporter::new();

        let err = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), true),
            &reporter,
            &|_, _| {},
        )
        .unwrap_err();

        assert!(matches!(err, Error::UnexpectedEof), "{err}");
        assert_eq!(server.borrow().retrieved, vec![1, 2]);
        assert_eq!(server.borrow().deleted, vec![1]);
        assert_eq!(server.borrow().quits, 1);
        assert!(dir.path().join("file1.txt").exists());
        assert!(!dir.path().join("file3.txt").exists());

        let errors = reporter.at_level(Level::ERROR);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context.message, Some(2));
        assert!(reporter.contains(Level::DEBUG, "state Failed"));
        assert!(!reporter.contains(Level::INFO, "attachments downloaded"));
    }

    #[test]
    fn test_undecodable_filename_is_reported_with_message_number() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(vec![
            with_attachment("fine.txt", "a"),
            with_attachment("=?UTF-8?B?unterminated.bin", "b"),
        ]);
        let reporter = MemoryReporter::new();

        let summary = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), false),
            &reporter,
            &|_, _| {},
        )
        .unwrap();

        assert_eq!(summary.attachments_saved, 2);
        let warnings: Vec<_> = reporter
            .entries()
            .into_iter()
            .filter(|e| e.level == Level::WARN)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].message, "Undecodable filename, using raw value");
        assert_eq!(warnings[0].context.message, Some(2));
        assert_eq!(
            warnings[0].context.filename.as_deref(),
            Some("=?UTF-8?B?unterminated.bin")
        );
        assert!(warnings[0].context.error.is_some());
    }

    #[test]
    fn test_list_failure_is_fatal_but_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(vec![with_attachment("a.txt", "a")]);
        server.borrow_mut().fail_list = true;
        let reporter = MemoryReporter::new();

        let err = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), true),
            &reporter,
            &|_, _| {},
        )
        .unwrap_err();

        assert!(matches!(err, Error::Protocol { .. }));
        assert!(reporter.contains(Level::ERROR, "mail list"));
        assert!(server.borrow().retrieved.is_empty());
        assert_eq!(server.borrow().quits, 1);
    }

    #[test]
    fn test_delete_after_all_attachments_saved() {
        let dir = tempfile::tempdir().unwrap();
        let plain = b"Subject: no attachments\r\n\r\nhello\r\n".to_vec();
        let server = fixture(vec![
            with_attachment("one.txt", "1"),
            plain,
            with_attachment("two.txt", "2"),
        ]);
        let reporter = MemoryReporter::new();

        let summary = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), true),
            &reporter,
            &|_, _| {},
        )
        .unwrap();

        assert_eq!(server.borrow().deleted, vec![1, 3]);
        assert_eq!(summary.deleted, 2);
    }

    #[test]
    fn test_failed_save_keeps_message() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the attachment file should go makes the write fail.
        std::fs::create_dir_all(dir.path().join("blocked.txt")).unwrap();
        let server = fixture(vec![
            with_attachment("blocked.txt", "x"),
            with_attachment("fine.txt", "y"),
        ]);
        let reporter = MemoryReporter::new();

        let summary = run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), true),
            &reporter,
            &|_, _| {},
        )
        .unwrap();

        assert_eq!(server.borrow().deleted, vec![2]);
        assert_eq!(summary.attachments_failed, 1);
        assert_eq!(summary.attachments_saved, 1);
        assert!(reporter.contains(Level::ERROR, "could not save"));
        assert!(reporter.contains(Level::WARN, "kept on server"));
    }

    #[test]
    fn test_deletion_disabled_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(vec![
            with_attachment("a.txt", "a"),
            with_attachment("b.txt", "b"),
        ]);

        run(
            FakeMailbox(Rc::clone(&server)),
            &settings(dir.path(), false),
            &MemoryReporter::new(),
            &|_, _| {},
        )
        .unwrap();

        assert!(server.borrow().deleted.is_empty());
    }

    #[test]
    fn test_second_run_overwrites_identically() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(vec![with_attachment("same.bin", "payload")]);

        for _ in 0..2 {
            run(
                FakeMailbox(Rc::clone(&server)),
                &settings(dir.path(), false),
                &MemoryReporter::new(),
                &|_, _| {},
            )
            .unwrap();
        }

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        assert_eq!(std::fs::read(dir.path().join("same.bin")).unwrap(), b"payload");
        assert_eq!(server.borrow().quits, 2);
    }

    #[test]
    fn test_progress_reports_every_message() {
        let dir = tempfile::tempdir().unwrap();
        let server = fixture(vec![with_attachment("a", "1"), with_attachment("b", "2")]);
        let calls = RefCell::new(Vec::new());

        run(
            FakeMailbox(server),
            &settings(dir.path(), false),
            &MemoryReporter::new(),
            &|current, total| calls.borrow_mut().push((current, total)),
        )
        .unwrap();

        assert_eq!(calls.into_inner(), vec![(0, 2), (1, 2), (2, 2)]);
    }
}
