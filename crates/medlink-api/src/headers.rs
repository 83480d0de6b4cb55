//! Outbound headers for authenticated portal API calls.

use medlink_session::{CredentialStore, decode_claim};
use medlink_types::AuthError;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Build the headers every authenticated API call carries.
///
/// The authorization value is the inner claim of the stored credential (or
/// the credential itself when it has none). Each call also slides the
/// session backup's expiry.
pub fn auth_headers(
    credentials: &CredentialStore,
    device_id: &str,
) -> Result<HeaderMap, AuthError> {
    let token = credentials.token()?;
    let claim = decode_claim(&token)?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        DEVICE_ID_HEADER,
        HeaderValue::from_str(device_id).map_err(|_| AuthError::TokenInvalid {
            reason: "device id is not a valid header value".into(),
        })?,
    );
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {claim}")).map_err(|_| {
            AuthError::TokenInvalid {
                reason: "credential is not a valid header value".into(),
            }
        })?,
    );

    credentials.renew();
    Ok(headers)
}
