//! Helpers for provider tests: in-process mock servers.

use axum::Router;
use knowbase_core::retry::RetryPolicy;

/// Serve `app` on an ephemeral loopback port and return its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Three attempts, no sleeping.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::immediate(3)
}
