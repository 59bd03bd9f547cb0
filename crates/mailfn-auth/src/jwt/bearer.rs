//! `Authorization: Bearer` parsing (RFC 6750 section 2.1)

/// Extract the credential from an `Authorization` header value
///
/// The scheme is matched case-insensitively and must be followed by a single
/// non-empty token68 parameter. Returns `None` for anything else.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, credential) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let credential = credential.trim_start_matches(' ');
    if credential.is_empty() || !credential.chars().all(is_token68_char) {
        return None;
    }
    Some(credential)
}

fn is_token68_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~' | '+' | '/' | '=')
}
