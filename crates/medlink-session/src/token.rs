//! Unwrapping of the stored credential for outbound authorization.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use medlink_types::AuthError;

/// Name of the inner claim carrying the upstream API token.
const INNER_CLAIM: &str = "token";

/// Extract the credential to send upstream from a stored JWT-shaped token.
///
/// Returns the inner `token` claim when the payload carries one, otherwise
/// the stored token itself. Anything that is not a decodable
/// `header.payload.signature` triple is rejected rather than passed through.
pub fn decode_claim(token: &str) -> Result<String, AuthError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::TokenMissing);
    }

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(invalid("expected three dot-separated segments"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| invalid("payload is not base64url"))?;
    let claims: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|_| invalid("payload is not JSON"))?;
    let claims = claims
        .as_object()
        .ok_or_else(|| invalid("payload is not a JSON object"))?;

    match claims.get(INNER_CLAIM).and_then(|v| v.as_str()) {
        Some(inner) if !inner.is_empty() => Ok(inner.to_string()),
        _ => Ok(token.to_string()),
    }
}

fn invalid(reason: &str) -> AuthError {
    AuthError::TokenInvalid {
        reason: reason.to_string(),
    }
}
