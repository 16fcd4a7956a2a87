//! Bounded downloads against a live backend.

mod common;

use resilient_egress::config::EgressConfig;
use resilient_egress::egress::{DownloadOptions, EgressError};

use common::{start_backend, test_client, Reply};

fn png(size: usize) -> Reply {
    Reply::ok(vec![0x89u8; size]).header("Content-Type", "image/png")
}

#[tokio::test]
async fn downloads_allowed_image() {
    let backend = start_backend(|_| png(2048)).await;
    let client = test_client(backend.port(), EgressConfig::default());

    let download = client
        .download_to_buffer(&backend.url("origin.test", "/logo.png"), DownloadOptions::default())
        .await
        .unwrap();

    assert_eq!(download.buffer.len(), 2048);
    assert_eq!(download.content_type.as_deref(), Some("image/png"));
    assert_eq!(download.final_url.path(), "/logo.png");
}

#[tokio::test]
async fn declared_length_over_limit_is_rejected_before_reading() {
    let backend = start_backend(|_| png(4096)).await;
    let client = test_client(backend.port(), EgressConfig::default());

    let err = client
        .download_to_buffer(
            &backend.url("origin.test", "/big.png"),
            DownloadOptions::default().max_bytes(1024),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EgressError::ResponseTooLarge {
            size: 4096,
            limit: 1024
        }
    ));
}

#[tokio::test]
async fn undeclared_stream_is_cut_at_the_limit() {
    let backend = start_backend(|_| png(8192).without_length()).await;
    let client = test_client(backend.port(), EgressConfig::default());

    let err = client
        .download_to_buffer(
            &backend.url("origin.test", "/stream.png"),
            DownloadOptions::default().max_bytes(1000),
        )
        .await
        .unwrap_err();

    match err {
        EgressError::ResponseTooLarge { size, limit } => {
            assert_eq!(limit, 1000);
            assert!(size > 1000);
        }
        other => panic!("expected size rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn content_type_outside_allow_list_is_rejected() {
    let backend = start_backend(|_| {
        Reply::ok("<html></html>").header("Content-Type", "text/html; charset=utf-8")
    })
    .await;
    let client = test_client(backend.port(), EgressConfig::default());
    let url = backend.url("origin.test", "/page");

    let err = client
        .download_to_buffer(&url, DownloadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EgressError::UnsupportedContentType(Some(ref ct)) if ct == "text/html"
    ));

    let download = client
        .download_to_buffer(&url, DownloadOptions::default().allow_content_types(["text/"]))
        .await
        .unwrap();
    assert_eq!(&download.buffer[..], b"<html></html>");
}

#[tokio::test]
async fn error_status_is_not_a_download() {
    let backend = start_backend(|_| Reply::new(404).body("missing")).await;
    let client = test_client(backend.port(), EgressConfig::default());

    let err = client
        .download_to_buffer(&backend.url("origin.test", "/gone.png"), DownloadOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, EgressError::Status { status: 404, .. }));
    assert!(!err.is_transient());
}
