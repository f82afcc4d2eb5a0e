use http_body_util::{BodyExt as _, Full, LengthLimitError, Limited};
use hyper::{
    body::{Body, Bytes},
    header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE},
    Response, StatusCode,
};
use metrics_relay::codec::{self, Signer, HASH_HEADER};
use serde::Serialize;
use tracing::warn;

use crate::routes::HandlerError;

/// Reads a request body, undoing any gzip encoding and checking its signature.
///
/// Both the raw and the decompressed body are limited to `max_size` bytes. The signature is only
/// checked when the server has a key and the request carries a signature header.
pub(crate) async fn read_payload<B>(
    headers: &HeaderMap,
    body: B,
    max_size: usize,
    signer: Option<&Signer>,
) -> Result<Vec<u8>, HandlerError>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let raw = Limited::new(body, max_size)
        .collect()
        .await
        .map_err(|e| {
            if e.downcast_ref::<LengthLimitError>().is_some() {
                HandlerError::TooLarge(max_size)
            } else {
                HandlerError::Body(e)
            }
        })?
        .to_bytes();

    let encoding = headers.get(CONTENT_ENCODING).map(|v| v.to_str().unwrap_or_default().trim());
    let payload = match encoding {
        None | Some("") | Some("identity") => raw.to_vec(),
        Some(e) if e.eq_ignore_ascii_case("gzip") => {
            codec::decompress(&raw, max_size).map_err(HandlerError::InvalidEncoding)?
        }
        Some(other) => return Err(HandlerError::UnsupportedEncoding(other.to_string())),
    };

    if let (Some(signer), Some(signature)) = (signer, headers.get(HASH_HEADER)) {
        let valid = signature.to_str().is_ok_and(|signature| signer.verify(&payload, signature));
        if !valid {
            return Err(HandlerError::SignatureMismatch);
        }
    }

    Ok(payload)
}

/// Returns `true` if the client accepts gzip-encoded responses.
pub(crate) fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers.get_all(ACCEPT_ENCODING).iter().filter_map(|v| v.to_str().ok()).any(|v| {
        v.split(',').any(|coding| {
            coding.split(';').next().is_some_and(|name| name.trim().eq_ignore_ascii_case("gzip"))
        })
    })
}

/// A response before content negotiation.
#[derive(Debug)]
pub(crate) struct Reply {
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
}

impl Reply {
    pub(crate) fn text<S: Into<String>>(status: StatusCode, text: S) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: Bytes::from(text.into()),
        }
    }

    pub(crate) fn json<T: Serialize>(value: &T) -> Result<Self, HandlerError> {
        let body = serde_json::to_vec(value).map_err(HandlerError::Encode)?;
        Ok(Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: Bytes::from(body),
        })
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.status
    }

    /// Builds the response, compressing the body when `gzip` is set.
    pub(crate) fn into_response(self, gzip: bool) -> Response<Full<Bytes>> {
        let mut encoded = false;
        let body = if gzip && !self.body.is_empty() {
            match codec::compress(&self.body) {
                Ok(compressed) => {
                    encoded = true;
                    Bytes::from(compressed)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to compress response, sending it uncompressed.");
                    self.body
                }
            }
        } else {
            self.body
        };

        let mut response = Response::new(Full::new(body));
        *response.status_mut() = self.status;
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        if encoded {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        response
    }
}
