//! MIME walk: collect every part that carries a Content-Disposition.

use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use super::header::decode_filename;
use crate::error::{Error, Result};
use crate::model::attachment::Attachment;

/// Parse a raw message and return its attachments in depth-first order.
///
/// Multipart containers carry no payload and are skipped. Parts without a
/// Content-Disposition header are inline body content and are skipped too.
/// Attached `message/rfc822` parts are descended into rather than saved.
pub fn parse_attachments(raw_message: &[u8]) -> Result<Vec<Attachment>> {
    let message = MessageParser::default()
        .parse(raw_message)
        .ok_or_else(|| Error::Decode("message could not be parsed as MIME".into()))?;

    let mut attachments = Vec::new();
    collect_attachments(&message, &mut attachments);
    Ok(attachments)
}

fn collect_attachments(message: &Message<'_>, out: &mut Vec<Attachment>) {
    for part in &message.parts {
        match &part.body {
            PartType::Multipart(_) => continue,
            PartType::Message(nested) => {
                collect_attachments(nested, out);
                continue;
            }
            _ => {}
        }

        if part.content_disposition().is_none() {
            continue;
        }

        let (filename, filename_error) = match part.attachment_name() {
            Some(raw) => {
                let (name, error) = decode_filename(raw);
                (name, error.map(|e| e.to_string()))
            }
            None => (format!("attachment_{}", out.len() + 1), None),
        };

        let content_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{sub}", ct.ctype()),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        out.push(Attachment {
            filename,
            content_type,
            data: part.contents().to_vec(),
            filename_error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIXED: &str = "From: alice@example.com\r\n\
To: bob@example.com\r\n\
Subject: Quarterly numbers\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XXX\"\r\n\
\r\n\
--XXX\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
See attached.\r\n\
--XXX\r\n\
Content-Type: application/pdf; name=\"Report (final)!.pdf\"\r\n\
Content-Disposition: attachment; filename=\"Report (final)!.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XXX\r\n\
Content-Type: text/plain; name=\"=?UTF-8?Q?notas_ni=C3=B1o.txt?=\"\r\n\
Content-Disposition: attachment; filename=\"=?UTF-8?Q?notas_ni=C3=B1o.txt?=\"\r\n\
\r\n\
hola\r\n\
--XXX--\r\n";

    #[test]
    fn test_skips_body_and_collects_attachments() {
        let attachments = parse_attachments(MIXED.as_bytes()).unwrap();
        assert_eq!(attachments.len(), 2);

        assert_eq!(attachments[0].filename, "Report (final)!.pdf");
        assert_eq!(attachments[0].content_type, "application/pdf");
        assert_eq!(attachments[0].data, b"%PDF-1.4\n");

        assert_eq!(attachments[1].filename, "notas niño.txt");
        assert!(attachments[1].data.starts_with(b"hola"));
        assert!(attachments.iter().all(|a| a.filename_error.is_none()));
    }

    #[test]
    fn test_undecodable_filename_keeps_raw_name_and_error() {
        let raw = b"Subject: x\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"=?UTF-8?B?unterminated.bin\"\r\n\
\r\n\
data\r\n\
--b--\r\n";
        let attachments = parse_attachments(raw).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "=?UTF-8?B?unterminated.bin");
        let error = attachments[0].filename_error.as_deref().unwrap();
        assert!(error.contains("malformed"), "{error}");
    }

    #[test]
    fn test_plain_message_has_no_attachments() {
        let raw = b"Subject: hi\r\nContent-Type: text/plain\r\n\r\nJust text.\r\n";
        assert!(parse_attachments(raw).unwrap().is_empty());
    }

    #[test]
    fn test_single_part_attachment_at_root() {
        let raw = b"Subject: scan\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment; filename=\"scan.bin\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
AAEC\r\n";
        let attachments = parse_attachments(raw).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "scan.bin");
        assert_eq!(attachments[0].data, vec![0u8, 1, 2]);
    }

    #[test]
    fn test_disposition_without_filename_gets_generated_name() {
        let raw = b"Subject: x\r\n\
Content-Type: multipart/mixed; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: application/octet-stream\r\n\
Content-Disposition: attachment\r\n\
\r\n\
data\r\n\
--b--\r\n";
        let attachments = parse_attachments(raw).unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].filename, "attachment_1");
    }

    #[test]
    fn test_nested_message_is_walked() {
        let raw = b"Subject: fwd\r\n\
Content-Type: multipart/mixed; boundary=\"outer\"\r\n\
\r\n\
--outer\r\n\
Content-Type: text/plain\r\n\
\r\n\
Forwarding.\r\n\
--outer\r\n\
Content-Type: message/rfc822\r\n\
\r\n\
Subject: inner\r\n\
Content-Type: multipart/mixed; boundary=\"inner\"\r\n\
\r\n\
--inner\r\n\
Content-Type: text/csv\r\n\
Content-Disposition: attachment; filename=\"inner.csv\"\r\n\
\r\n\
a,b\r\n\
--inner--\r\n\
--outer--\r\n";
        let attachments = parse_attachments(raw).unwrap();
        let names: Vec<&str> = attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["inner.csv"]);
    }
}
