use std::{future::Future, io, pin::Pin, time::Duration};

use http_body_util::{BodyExt as _, Full};
use hyper::{
    body::Bytes,
    header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE},
    Method, Request, StatusCode, Uri,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use metrics_relay::{
    codec::{self, Signer, HASH_HEADER},
    wire, Batch,
};
use thiserror::Error;

/// Future returned by [`Transport::send`].
pub type SendFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Errors that could occur while sending a batch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The batch could not be serialized.
    #[error("failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),

    /// The payload could not be compressed.
    #[error("failed to compress payload: {0}")]
    Compress(#[source] io::Error),

    /// The HTTP request could not be built.
    #[error("failed to build request: {0}")]
    Request(String),

    /// The request could not be sent or the response could not be read.
    #[error("request failed: {0}")]
    Connect(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No response arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-success status.
    #[error("server responded with {0}")]
    Status(StatusCode),
}

impl TransportError {
    /// Returns `true` if sending the same batch again may succeed.
    ///
    /// Connection failures, timeouts and 5xx responses are retryable. Everything else, including
    /// 4xx responses, is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect(_) | TransportError::Timeout(_) => true,
            TransportError::Status(status) => status.is_server_error(),
            TransportError::Encode(_)
            | TransportError::Compress(_)
            | TransportError::Request(_) => false,
        }
    }
}

/// Sends sealed batches to a remote aggregator.
///
/// One call to `send` is one delivery attempt. Retries are the caller's job.
pub trait Transport: Send + Sync + 'static {
    /// Sends `batch`, resolving once the remote side has accepted or rejected it.
    fn send<'a>(&'a self, batch: &'a Batch) -> SendFuture<'a>;
}

/// A [`Transport`] posting gzip-compressed JSON to an HTTP endpoint.
pub struct HttpTransport {
    client: Client<HttpConnector, Full<Bytes>>,
    endpoint: Uri,
    signer: Option<Signer>,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Creates a new `HttpTransport` posting to `endpoint`.
    ///
    /// When `signer` is set, every request carries the signature of its uncompressed payload.
    pub fn new(endpoint: Uri, signer: Option<Signer>, request_timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build_http();

        Self { client, endpoint, signer, request_timeout }
    }

    /// Returns the endpoint batches are posted to.
    pub fn endpoint(&self) -> &Uri {
        &self.endpoint
    }

    fn build_request(&self, batch: &Batch) -> Result<Request<Full<Bytes>>, TransportError> {
        let payload = wire::encode_batch(batch).map_err(TransportError::Encode)?;
        let compressed = codec::compress(&payload).map_err(TransportError::Compress)?;

        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .header(ACCEPT_ENCODING, "gzip");
        if let Some(signer) = &self.signer {
            builder = builder.header(HASH_HEADER, signer.sign(&payload));
        }

        builder
            .body(Full::new(Bytes::from(compressed)))
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn send_once(&self, batch: &Batch) -> Result<(), TransportError> {
        let req = self.build_request(batch)?;

        let exchange = async {
            let response =
                self.client.request(req).await.map_err(|e| TransportError::Connect(Box::new(e)))?;
            let status = response.status();

            // Read the body to completion so the connection goes back to the pool.
            response.into_body().collect().await.map_err(|e| TransportError::Connect(Box::new(e)))?;
            Ok::<_, TransportError>(status)
        };

        let status = tokio::time::timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(self.request_timeout))??;

        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status(status))
        }
    }
}

impl Transport for HttpTransport {
    fn send<'a>(&'a self, batch: &'a Batch) -> SendFuture<'a> {
        Box::pin(self.send_once(batch))
    }
}

/// Turns a configured address into the batch endpoint.
///
/// Accepts a bare `host:port` or a full `http://` URL. A URL without a path gets `/updates/`.
pub(crate) fn endpoint_from_address(address: &str) -> Result<Uri, String> {
    let address = address.trim();
    if address.is_empty() {
        return Err("address is empty".to_string());
    }

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };

    let uri = with_scheme.parse::<Uri>().map_err(|e| e.to_string())?;
    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => return Err(format!("unsupported scheme '{other}' (expected 'http')")),
        None => return Err("missing scheme".to_string()),
    }
    if uri.host().is_none() {
        return Err("missing host".to_string());
    }

    if uri.path() == "/" || uri.path().is_empty() {
        let authority = uri.authority().map(|a| a.as_str()).unwrap_or_default();
        return format!("http://{authority}/updates/").parse::<Uri>().map_err(|e| e.to_string());
    }
    Ok(uri)
}
