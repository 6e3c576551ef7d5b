// src/utils.rs

use crate::error::*;
use log::debug;
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Characters escaped when a content path is percent-encoded. Path and query
/// delimiters stay intact so the server still sees the same route; `#` is
/// escaped since a fragment would never reach the server.
const CONTENT_PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'#')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'|')
    .add(b'\\')
    .add(b'^')
    .add(b'[')
    .add(b']');

pub fn truncate_text(text: &str, max_width: usize) -> String {
    let mut width = 0;
    let mut end_pos = 0;
    for (i, c) in text.char_indices() {
        width += if c.is_ascii() { 1 } else { 2 };
        if width > max_width.saturating_sub(3) {
            end_pos = i;
            break;
        }
    }
    if end_pos == 0 { text.to_string() } else { format!("{}...", &text[..end_pos]) }
}

/// Joins an untrusted path (a book id, a relative name) under `base_dir`,
/// refusing anything that could escape it.
pub fn secure_join_path(base_dir: &Path, relative_path: &Path) -> AppResult<PathBuf> {
    let mut final_path = base_dir.to_path_buf();
    let mut pushed = 0usize;
    for component in relative_path.components() {
        match component {
            Component::Normal(part) => {
                final_path.push(part);
                pushed += 1;
            }
            Component::ParentDir => {
                return Err(AppError::Security(format!(
                    "path traversal '..' in '{}'",
                    relative_path.display()
                )));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(AppError::Security(format!(
                    "absolute path '{}' not allowed here",
                    relative_path.display()
                )));
            }
            Component::CurDir => continue,
        }
    }
    if pushed == 0 {
        return Err(AppError::Security(format!(
            "empty path component '{}'",
            relative_path.display()
        )));
    }
    Ok(final_path)
}

/// Turns a track's content path into an absolute URL against the server.
///
/// Tries, in order: plain concatenation, concatenation with the path
/// percent-encoded, and `Url::join`. Absolute URLs are accepted as-is.
pub fn resolve_content_url(base: &Url, content_url: &str) -> AppResult<Url> {
    let trimmed = content_url.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidAudioUrl(content_url.to_string()));
    }
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return Url::parse(trimmed).map_err(|_| AppError::InvalidAudioUrl(content_url.to_string()));
    }

    let base_str = base.as_str().trim_end_matches('/');
    let path = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };

    let direct = format!("{base_str}{path}");
    if let Ok(url) = Url::parse(&direct)
        && url.fragment().is_none()
        && url.as_str() == direct
    {
        return Ok(url);
    }
    debug!("Direct URL for '{}' is not canonical, trying percent-encoding", content_url);

    let encoded = format!("{base_str}{}", utf8_percent_encode(&path, CONTENT_PATH_ENCODE_SET));
    if let Ok(url) = Url::parse(&encoded) {
        return Ok(url);
    }
    debug!("Percent-encoded URL for '{}' failed, trying structured join", content_url);

    base.join(&path)
        .map_err(|_| AppError::InvalidAudioUrl(content_url.to_string()))
}

/// Replaces `{name}` placeholders in an API path template.
pub fn fill_template(template: &str, params: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, val) in params {
        out = out.replace(&format!("{{{}}}", key), val);
    }
    out
}
