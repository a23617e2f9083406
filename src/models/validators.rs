use std::borrow::Cow;

use validator::ValidationError;

/// Maximum number of allow-listed redirect URIs per client
const MAX_REDIRECT_URIS: usize = 50;

const MAX_REDIRECT_URI_LENGTH: usize = 2048;

/// Validate a single redirect URI: absolute, with a scheme and no whitespace.
pub fn validate_redirect_uri(uri: &str) -> Result<(), ValidationError> {
    if uri.len() > MAX_REDIRECT_URI_LENGTH {
        let mut err = ValidationError::new("redirect_uri_too_long");
        err.message = Some(Cow::Owned(format!(
            "Redirect URIs cannot exceed {} characters",
            MAX_REDIRECT_URI_LENGTH
        )));
        return Err(err);
    }
    if uri.chars().any(char::is_whitespace) || url::Url::parse(uri).is_err() {
        let mut err = ValidationError::new("invalid_redirect_uri");
        err.message = Some(Cow::Owned(format!("'{}' is not an absolute URI", uri)));
        return Err(err);
    }
    Ok(())
}

/// Validate the redirect URI allow-list.
///
/// Ensures that:
/// - At least one and at most MAX_REDIRECT_URIS entries are provided
/// - Every entry is a valid absolute URI
pub fn validate_redirect_uris(uris: &[String]) -> Result<(), ValidationError> {
    if uris.is_empty() {
        let mut err = ValidationError::new("redirect_uris_required");
        err.message = Some(Cow::Borrowed("redirectURIs is required in the input"));
        return Err(err);
    }
    if uris.len() > MAX_REDIRECT_URIS {
        let mut err = ValidationError::new("too_many_redirect_uris");
        err.message = Some(Cow::Owned(format!(
            "Maximum {} redirect URIs allowed",
            MAX_REDIRECT_URIS
        )));
        return Err(err);
    }
    uris.iter().try_for_each(|uri| validate_redirect_uri(uri))
}
