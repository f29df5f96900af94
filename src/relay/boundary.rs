//! Multipart boundary handling.
//!
//! # Responsibilities
//! - Extract the boundary token from an upstream `Content-Type` value
//! - Build and locate the `--<boundary>` frame marker inside byte chunks

const BOUNDARY_PARAM: &str = "boundary=";

/// Extract the multipart boundary token from a `Content-Type` header value.
///
/// The parameter value ends at the next `;`, or failing that at the next `\r`
/// (some cameras leave a stray CR on header lines), or at the end of the value.
/// Quote characters and one leading `--` are stripped. Returns an empty string
/// when no `boundary=` parameter is present.
pub fn extract_boundary(content_type: &str) -> String {
    let Some(start) = content_type.find(BOUNDARY_PARAM) else {
        return String::new();
    };
    let rest = &content_type[start + BOUNDARY_PARAM.len()..];
    let end = rest
        .find(';')
        .or_else(|| rest.find('\r'))
        .unwrap_or(rest.len());

    let token: String = rest[..end].chars().filter(|c| *c != '"').collect();
    match token.strip_prefix("--") {
        Some(stripped) => stripped.to_string(),
        None => token,
    }
}

/// The frame marker (`--<boundary>`) as it appears in the body.
pub fn frame_marker(boundary: &str) -> Vec<u8> {
    let mut marker = Vec::with_capacity(boundary.len() + 2);
    marker.extend_from_slice(b"--");
    marker.extend_from_slice(boundary.as_bytes());
    marker
}

/// Find the first occurrence of `marker` in `haystack` at or after `from`.
pub fn find_marker(haystack: &[u8], marker: &[u8], from: usize) -> Option<usize> {
    if marker.is_empty() || from >= haystack.len() || haystack.len() - from < marker.len() {
        return None;
    }
    haystack[from..]
        .windows(marker.len())
        .position(|window| window == marker)
        .map(|offset| offset + from)
}
