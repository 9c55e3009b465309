//! Filename decoding: RFC 2047 encoded-words with charset conversion.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use crate::error::{Error, Result};

/// Decode a declared attachment filename.
///
/// Encoded words are decoded with their declared charset. Text without
/// encoded words is returned unchanged. If the encoding is malformed the raw
/// text is returned together with the decoding error, so a bad header never
/// loses the attachment and the caller can still report it.
pub fn decode_filename(raw: &str) -> (String, Option<Error>) {
    match decode_encoded_words(raw) {
        Ok(decoded) => (decoded, None),
        Err(e) => (raw.to_string(), Some(e)),
    }
}

/// Decode every RFC 2047 encoded-word in `input`.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Whitespace between two adjacent encoded words is dropped (RFC 2047 §6.2).
/// Fails on an unterminated word, an unknown transfer encoding or charset,
/// or bytes that are invalid in the declared charset.
pub fn decode_encoded_words(input: &str) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];
        let word = decode_one_word(after_start)?;
        result.push_str(&word.text);
        remaining = &after_start[word.consumed..];
        last_was_encoded = true;
    }

    result.push_str(remaining);
    Ok(result)
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn decode_one_word(s: &str) -> Result<DecodedWord> {
    let malformed = || Error::Decode(format!("malformed encoded word '=?{s}'"));

    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?').ok_or_else(malformed)?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?').ok_or_else(malformed)?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=").ok_or_else(malformed)?;
    let encoded_text = &rest2[..end];

    let bytes = match encoding.to_ascii_uppercase().as_str() {
        "B" => STANDARD
            .decode(encoded_text)
            .or_else(|_| STANDARD_NO_PAD.decode(encoded_text))
            .map_err(|e| Error::Decode(format!("bad base64 in encoded word: {e}")))?,
        "Q" => decode_q_encoding(encoded_text)?,
        other => {
            return Err(Error::Decode(format!(
                "unknown encoded-word encoding '{other}'"
            )))
        }
    };

    Ok(DecodedWord {
        text: decode_charset(charset, &bytes)?,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                let byte = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| Error::Decode(format!("bad Q escape in '{input}'")))?;
                result.push(byte);
                i += 3;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Ok(result)
}

/// Decode bytes using a named charset (an RFC 2231 `*lang` suffix is ignored).
fn decode_charset(charset: &str, bytes: &[u8]) -> Result<String> {
    let label = charset.split('*').next().unwrap_or(charset);
    let encoding = encoding_rs::Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::UnsupportedCharset(label.to_string()))?;
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|text| text.into_owned())
        .ok_or_else(|| Error::Decode(format!("invalid {} bytes", encoding.name())))
}
