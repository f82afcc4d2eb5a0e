use std::{net::SocketAddr, sync::Arc};

use http_body_util::{BodyExt, Full};
use hyper::{
    body::Bytes,
    header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE},
    Method, Request, StatusCode,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use metrics_relay::{
    codec::{self, Signer, HASH_HEADER},
    wire, MemoryStore, Metric, Store,
};
use metrics_relay_server::ServerBuilder;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Running {
    address: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Running {
    async fn stop(self) {
        self.shutdown.cancel();
        self.handle
            .await
            .unwrap_or_else(|e| panic!("server task failed: {e:?}"))
            .unwrap_or_else(|e| panic!("server failed: {e:?}"));
    }
}

fn start(store: Arc<dyn Store>, key: Option<&str>) -> Running {
    let mut builder = ServerBuilder::new().with_listen_address("127.0.0.1:0");
    if let Some(key) = key {
        builder = builder.with_signing_key(key);
    }
    let server = builder.build(store).unwrap_or_else(|e| panic!("failed to build server: {e:?}"));
    let address = server.local_addr();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(server.serve(shutdown.clone()));
    Running { address, shutdown, handle }
}

fn client() -> Client<HttpConnector, Full<Bytes>> {
    Client::builder(TokioExecutor::new()).build_http()
}

async fn send(request: Request<Full<Bytes>>) -> (StatusCode, Option<String>, Vec<u8>) {
    let response =
        client().request(request).await.unwrap_or_else(|e| panic!("request failed: {e:?}"));
    let status = response.status();
    let encoding =
        response.headers().get(CONTENT_ENCODING).map(|v| v.to_str().unwrap().to_string());
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, encoding, body)
}

fn post(address: SocketAddr, path: &str) -> hyper::http::request::Builder {
    Request::builder().method(Method::POST).uri(format!("http://{address}{path}"))
}

fn signed_batch(address: SocketAddr, signer: &Signer, metrics: &[Metric]) -> Request<Full<Bytes>> {
    let payload = wire::encode_batch(metrics).unwrap();
    let signature = signer.sign(&payload);
    post(address, "/updates/")
        .header(CONTENT_TYPE, "application/json")
        .header(CONTENT_ENCODING, "gzip")
        .header(HASH_HEADER, signature)
        .body(Full::new(Bytes::from(codec::compress(&payload).unwrap())))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signed_gzip_batch_is_applied() {
    let store = Arc::new(MemoryStore::new());
    let server = start(store.clone(), Some("secret"));
    let signer = Signer::new(b"secret").unwrap();

    let metrics = [
        Metric::gauge("Alloc", 123.45),
        Metric::counter("PollCount", 1),
        Metric::counter("PollCount", 1),
    ];
    let (status, _, _) = send(signed_batch(server.address, &signer, &metrics)).await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(store.gauge("Alloc").unwrap(), Some(123.45));
    assert_eq!(store.counter("PollCount").unwrap(), Some(2));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrongly_signed_batch_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let server = start(store.clone(), Some("secret"));
    let wrong = Signer::new(b"not the secret").unwrap();

    let (status, _, _) =
        send(signed_batch(server.address, &wrong, &[Metric::counter("PollCount", 1)])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.counter("PollCount").unwrap(), None);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_batch_leaves_store_untouched() {
    let store = Arc::new(MemoryStore::new());
    let server = start(store.clone(), None);

    let body = br#"[{"id":"a","type":"counter","delta":1},{"id":"b","type":"gauge"}]"#;
    let request = post(server.address, "/updates")
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(body)))
        .unwrap();
    let (status, _, _) = send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(store.counter("a").unwrap(), None);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn json_value_is_gzipped_when_accepted() {
    let store = Arc::new(MemoryStore::new());
    store.update_gauge("Alloc", 1.5).unwrap();
    let server = start(store, None);

    let request = post(server.address, "/value/")
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT_ENCODING, "gzip")
        .body(Full::new(Bytes::from_static(br#"{"id":"Alloc","type":"gauge"}"#)))
        .unwrap();
    let (status, encoding, body) = send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(encoding.as_deref(), Some("gzip"));

    let body = codec::decompress(&body, 1024).unwrap();
    assert_eq!(body, br#"{"id":"Alloc","type":"gauge","value":1.5}"#);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_routes_round_trip() {
    let server = start(Arc::new(MemoryStore::new()), None);
    let base = format!("http://{}", server.address);

    for _ in 0..3 {
        let request = post(server.address, "/update/counter/PollCount/2")
            .body(Full::default())
            .unwrap();
        let (status, _, body) = send(request).await;
        assert_eq!((status, body.as_slice()), (StatusCode::OK, &b"OK\n"[..]));
    }

    let request = Request::get(format!("{base}/value/counter/PollCount"))
        .body(Full::default())
        .unwrap();
    let (status, encoding, body) = send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(encoding, None);
    assert_eq!(body, b"6");

    let request =
        Request::get(format!("{base}/value/gauge/Missing")).body(Full::default()).unwrap();
    assert_eq!(send(request).await.0, StatusCode::NOT_FOUND);

    let request = Request::get(format!("{base}/ping")).body(Full::default()).unwrap();
    assert_eq!(send(request).await.0, StatusCode::OK);

    let request = Request::delete(format!("{base}/ping")).body(Full::default()).unwrap();
    assert_eq!(send(request).await.0, StatusCode::METHOD_NOT_ALLOWED);

    server.stop().await;
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sqlite_store_survives_restart() {
    use metrics_relay::SqliteStore;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("metrics.db");

    let server = start(Arc::new(SqliteStore::open(&path).unwrap()), None);
    let request = post(server.address, "/update/counter/PollCount/5")
        .body(Full::default())
        .unwrap();
    assert_eq!(send(request).await.0, StatusCode::OK);
    server.stop().await;

    let server = start(Arc::new(SqliteStore::open(&path).unwrap()), None);
    let request = Request::get(format!("http://{}/value/counter/PollCount", server.address))
        .body(Full::default())
        .unwrap();
    let (status, _, body) = send(request).await;
    assert_eq!((status, body.as_slice()), (StatusCode::OK, &b"5"[..]));
    server.stop().await;
}
