use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::HttpsConnectorBuilder;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;

/// Shared hyper client with connection pooling (HTTP/HTTPS via rustls).
///
/// A single client instance is reused across requests so upstream
/// connections pool instead of churning.
static SHARED_CLIENT: Lazy<Arc<Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>>> =
    Lazy::new(|| Arc::new(build_client()));

pub fn shared() -> Arc<Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>> {
    Arc::clone(&SHARED_CLIENT)
}

fn build_client() -> Client<hyper_rustls::HttpsConnector<HttpConnector>, Body> {
    let mut http = HttpConnector::new();
    http.enforce_http(false); // allow https upstreams through the wrapper
    http.set_nodelay(true);

    let https = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(32)
        .build::<_, Body>(https)
}
