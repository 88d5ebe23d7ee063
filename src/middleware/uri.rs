//! URI helpers shared by ranking and forwarding.

/// Removes `user:password@` from the authority part of a URI.
///
/// Only the authority is touched, so an `@` in the path or query is kept.
/// Strings without a scheme separator are returned unchanged.
pub fn strip_auth(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let authority_start = scheme_end + 3;
    let rest = &uri[authority_start..];
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    match authority.rfind('@') {
        Some(at) => format!(
            "{}{}{}",
            &uri[..authority_start],
            &authority[at + 1..],
            &rest[authority_end..]
        ),
        None => uri.to_string(),
    }
}

/// Host part of a URI after credentials are removed, without port.
pub fn host_of(uri: &str) -> Option<String> {
    let stripped = strip_auth(uri);
    url::Url::parse(&stripped)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|h| h.trim_matches(['[', ']']).to_string()))
        .filter(|host| !host.is_empty())
}
