//! Minimal `multipart/related` splitting for WADO-RS responses.

use crate::error::DownloadError;

/// Splits a content type into its `name=value` parameters. Quoted values
/// may contain `;` and backslash escapes.
fn parameters(content_type: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut rest = match content_type.split_once(';') {
        Some((_, rest)) => rest,
        None => return params,
    };

    loop {
        rest = rest.trim_start_matches([' ', '\t', ';']);
        let Some((name, after)) = rest.split_once('=') else {
            return params;
        };
        let name = name.trim().to_ascii_lowercase();
        let after = after.trim_start();

        let (value, remainder) = match after.strip_prefix('"') {
            Some(quoted) => {
                let mut value = String::new();
                let mut chars = quoted.char_indices();
                let mut end = quoted.len();
                while let Some((offset, ch)) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some((_, escaped)) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => {
                            end = offset + 1;
                            break;
                        }
                        _ => value.push(ch),
                    }
                }
                (value, &quoted[end..])
            }
            None => {
                let (value, remainder) = after.split_once(';').unwrap_or((after, ""));
                (value.trim().to_string(), remainder)
            }
        };
        params.push((name, value));

        // Skip anything between a closing quote and the next separator.
        rest = match remainder.split_once(';') {
            Some((_, next)) => next,
            None => return params,
        };
    }
}

/// Extracts the `boundary` parameter of a multipart content type.
pub fn boundary(content_type: &str) -> Option<String> {
    parameters(content_type)
        .into_iter()
        .find(|(name, value)| name == "boundary" && !value.is_empty())
        .map(|(_, value)| value)
}

pub fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/")
}

/// Splits a multipart body into the bodies of its parts. Part headers are
/// discarded. Lines may end in CRLF or a bare LF.
pub fn split_parts(content_type: &str, body: &[u8]) -> Result<Vec<Vec<u8>>, DownloadError> {
    let boundary = boundary(content_type)
        .ok_or_else(|| DownloadError::Multipart(format!("no boundary in {content_type}")))?;
    let delimiter = format!("--{boundary}").into_bytes();
    let line_delimiter = format!("\n--{boundary}").into_bytes();

    let mut cursor = if body.starts_with(&delimiter) {
        delimiter.len()
    } else {
        find(body, &line_delimiter, 0)
            .ok_or_else(|| DownloadError::Multipart("missing opening boundary".to_string()))?
            + line_delimiter.len()
    };

    let mut parts = Vec::new();
    loop {
        if body[cursor..].starts_with(b"--") {
            break;
        }
        // Rest of the boundary line, then headers up to the first blank line.
        cursor = next_line(body, cursor)?;
        loop {
            let line_end = next_line(body, cursor)?;
            let line = &body[cursor..line_end];
            cursor = line_end;
            if line == b"\n" || line == b"\r\n" {
                break;
            }
        }

        let content_start = cursor;
        let newline = find(body, &line_delimiter, content_start - 1)
            .ok_or_else(|| DownloadError::Multipart("unterminated part body".to_string()))?;
        let content_end = if newline > content_start && body[newline - 1] == b'\r' {
            newline - 1
        } else {
            newline.max(content_start)
        };

        parts.push(body[content_start..content_end].to_vec());
        cursor = newline + line_delimiter.len();
    }
    Ok(parts)
}

/// Position just past the next `\n` at or after `from`.
fn next_line(body: &[u8], from: usize) -> Result<usize, DownloadError> {
    find(body, b"\n", from)
        .map(|newline| newline + 1)
        .ok_or_else(|| DownloadError::Multipart("truncated part headers".to_string()))
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}
