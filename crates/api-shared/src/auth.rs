use td_types::AccessToken;

/// Header carrying the caller's vault access token on every internal API request.
pub const ACCESS_TOKEN_HEADER: &str = "x-tv-access-token";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing {ACCESS_TOKEN_HEADER} header")]
    Missing,
    #[error("malformed {ACCESS_TOKEN_HEADER} header")]
    Malformed,
}

/// Parses the raw access-token header value.
///
/// `None` means the header was absent or not valid UTF-8.
///
/// # Errors
///
/// Returns `AuthError::Missing` if there is no value and `AuthError::Malformed` if the value is
/// blank.
pub fn parse_access_token(header: Option<&str>) -> Result<AccessToken, AuthError> {
    let value = header.ok_or(AuthError::Missing)?;
    AccessToken::new(value).map_err(|_| AuthError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_access_token() {
        assert_eq!(parse_access_token(None).unwrap_err(), AuthError::Missing);
        assert_eq!(
            parse_access_token(Some("   ")).unwrap_err(),
            AuthError::Malformed
        );
        let token = parse_access_token(Some("abc123")).unwrap();
        assert_eq!(token.expose(), "abc123");
    }
}
