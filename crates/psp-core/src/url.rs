//! Fast URL parsing utilities for the hot path
//!
//! These functions avoid allocations and work directly on string slices.
//! They validate structure only; nothing here resolves or normalises URLs.

// =============================================================================
// Scheme Extraction
// =============================================================================

/// Get the position after "://".
#[inline]
pub fn get_scheme_end(url: &str) -> Option<usize> {
    let bytes = url.as_bytes();

    // Find ':'
    let colon_pos = bytes.iter().position(|&b| b == b':')?;

    // Check for "://"
    if bytes.len() > colon_pos + 2
        && bytes[colon_pos + 1] == b'/'
        && bytes[colon_pos + 2] == b'/'
    {
        return Some(colon_pos + 3);
    }

    // Data URLs use ":" not "://"
    if colon_pos >= 4 && bytes[..colon_pos].eq_ignore_ascii_case(b"data") {
        return Some(colon_pos + 1);
    }

    None
}

/// Extract the scheme name (without ':').
/// Returns None if the prefix is not a syntactically valid scheme.
#[inline]
pub fn extract_scheme(url: &str) -> Option<&str> {
    let colon_pos = url.find(':')?;
    let scheme = &url[..colon_pos];
    let bytes = scheme.as_bytes();

    if bytes.is_empty() || !bytes[0].is_ascii_alphabetic() {
        return None;
    }
    if !bytes
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.')
    {
        return None;
    }

    Some(scheme)
}

/// Check whether the URL uses one of the given schemes (case-insensitive).
pub fn has_scheme_in<S: AsRef<str>>(url: &str, schemes: &[S]) -> bool {
    match extract_scheme(url) {
        Some(scheme) => schemes.iter().any(|s| s.as_ref().eq_ignore_ascii_case(scheme)),
        None => false,
    }
}

// =============================================================================
// Host Extraction
// =============================================================================

/// Fast host extraction without allocations.
/// Returns a slice into the original URL.
#[inline]
pub fn extract_host(url: &str) -> Option<&str> {
    let (host_start, host_end) = get_host_position(url)?;
    Some(&url[host_start..host_end])
}

/// Get the start and end positions of the hostname in a URL.
#[inline]
pub fn get_host_position(url: &str) -> Option<(usize, usize)> {
    let scheme_end = get_scheme_end(url)?;
    let bytes = url.as_bytes();

    // Skip userinfo
    let mut host_start = scheme_end;
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'@' {
            host_start = i + 1;
            break;
        }
        if b == b'/' || b == b'?' || b == b'#' {
            break;
        }
    }

    // Find host end
    let mut host_end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(host_start) {
        if b == b'/' || b == b'?' || b == b'#' || b == b':' {
            host_end = i;
            break;
        }
    }

    Some((host_start, host_end))
}

/// Scheme, host and port as one slice (`https://example.com:8443`).
#[inline]
pub fn extract_origin(url: &str) -> Option<&str> {
    let scheme_end = get_scheme_end(url)?;
    if !url[..scheme_end].ends_with("://") {
        return None;
    }

    let bytes = url.as_bytes();
    let mut end = bytes.len();
    for (i, &b) in bytes.iter().enumerate().skip(scheme_end) {
        if b == b'/' || b == b'?' || b == b'#' {
            end = i;
            break;
        }
    }

    Some(&url[..end])
}

/// Same-origin check used to decide whether a nested frame is readable.
pub fn is_same_origin(a: &str, b: &str) -> bool {
    match (extract_origin(a), extract_origin(b)) {
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

// =============================================================================
// Structural Validation
// =============================================================================

/// Basic structural validation: a scheme, "://" and a non-empty host
/// without whitespace or control characters.
pub fn is_valid_url(url: &str) -> bool {
    if url.is_empty() || url.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
        return false;
    }
    if extract_scheme(url).is_none() {
        return false;
    }
    let scheme_end = match get_scheme_end(url) {
        Some(pos) => pos,
        None => return false,
    };
    if !url[..scheme_end].ends_with("://") {
        return false;
    }

    matches!(extract_host(url), Some(host) if !host.is_empty())
}
