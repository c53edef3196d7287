use std::{future, time::Duration};

use axum::{
    extract::Path,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    routing::{any, get, post},
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;

/// Prefix added to request header names when they are echoed back.
pub const ECHO_PREFIX: &str = "echo-";

pub fn app() -> Router {
    Router::new()
        .route("/created", post(created).put(created))
        .route("/echo", any(echo))
        .route("/status/{code}", any(status))
        .route("/delay/{ms}", get(delay))
        .route("/hang", any(hang))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Start the server on a random local port in a background thread and
/// return its base URL.
pub fn spawn() -> String {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = std_listener.local_addr().expect("mock server address");
    std_listener
        .set_nonblocking(true)
        .expect("non-blocking listener");

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("mock server runtime");
        rt.block_on(async {
            let listener = TcpListener::from_std(std_listener)?;
            run(listener).await
        })
        .expect("mock server failed");
    });

    format!("http://{addr}")
}

async fn created() -> (StatusCode, &'static str) {
    (StatusCode::CREATED, "ok")
}

/// Return the request body and copy every request header into the response
/// under `echo-<name>`.
async fn echo(headers: HeaderMap, body: Bytes) -> (StatusCode, HeaderMap, Bytes) {
    let mut out = HeaderMap::new();
    for (name, value) in &headers {
        let echoed = format!("{ECHO_PREFIX}{name}");
        if let Ok(echoed) = HeaderName::from_bytes(echoed.as_bytes()) {
            out.append(echoed, value.clone());
        }
    }
    out.insert(
        "body-length",
        HeaderValue::from_str(&body.len().to_string()).expect("numeric header"),
    );
    (StatusCode::OK, out, body)
}

async fn status(Path(code): Path<u16>) -> Result<(StatusCode, String), StatusCode> {
    let status = StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)?;
    Ok((status, format!("status {code}")))
}

async fn delay(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "done"
}

async fn hang() -> &'static str {
    future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_prefix_builds_valid_header_names() {
        let name = format!("{ECHO_PREFIX}x-request-id");
        assert!(HeaderName::from_bytes(name.as_bytes()).is_ok());
    }

    #[tokio::test]
    async fn created_returns_ok_body() {
        let (code, body) = created().await;
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn status_rejects_out_of_range_codes() {
        assert_eq!(status(Path(42)).await.unwrap_err(), StatusCode::BAD_REQUEST);
        let (code, body) = status(Path(503)).await.unwrap();
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "status 503");
    }
}
