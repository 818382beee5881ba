//! Lossy text decoding for device output.

/// Decode the complete part of `pending` and remove it from the vector.
///
/// Invalid sequences become one `U+FFFD` each. A trailing sequence that is
/// only the start of a character stays in `pending` so the next read can
/// complete it.
pub fn decode_lossy_prefix(pending: &mut Vec<u8>) -> String {
    let mut text = String::with_capacity(pending.len());
    let mut consumed = 0;

    for chunk in pending.utf8_chunks() {
        text.push_str(chunk.valid());
        consumed += chunk.valid().len();

        let invalid = chunk.invalid();
        if invalid.is_empty() {
            continue;
        }
        let at_end = consumed + invalid.len() == pending.len();
        if at_end && is_truncated_char(invalid) {
            break;
        }
        text.push(char::REPLACEMENT_CHARACTER);
        consumed += invalid.len();
    }

    pending.drain(..consumed);
    text
}

/// Whether `bytes` is a proper prefix of some UTF-8 encoded character.
fn is_truncated_char(bytes: &[u8]) -> bool {
    matches!(std::str::from_utf8(bytes), Err(e) if e.error_len().is_none())
}

/// Normalize device line endings (`\r\n` and bare `\r`) to `\n`.
pub fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
}
