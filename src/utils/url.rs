// src/utils/url.rs

//! URL manipulation utilities.

/// Derive a listing's identity from its canonical link.
///
/// The identity is the final path segment with any `.html` suffix removed.
///
/// # Examples
/// ```
/// use listing_watch::utils::url::listing_identity;
///
/// assert_eq!(
///     listing_identity("https://example.org/abc/d/widget/7001234567.html"),
///     Some("7001234567".to_string())
/// );
/// ```
pub fn listing_identity(link: &str) -> Option<String> {
    let segment = match url::Url::parse(link) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string),
        // Relative or malformed links: take the text after the last slash
        Err(_) => link
            .split(['?', '#'])
            .next()
            .and_then(|path| path.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string),
    }?;

    let identity = segment.strip_suffix(".html").unwrap_or(&segment).trim();
    if identity.is_empty() {
        None
    } else {
        Some(identity.to_string())
    }
}
