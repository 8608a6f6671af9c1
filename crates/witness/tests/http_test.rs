// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! Router tests: pipeline outcomes mapped onto the wire protocol.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{corrupt_signature, Harness, WITNESS_NAME};
use tower::ServiceExt;

async fn post(h: &Harness, body: Vec<u8>) -> axum::http::Response<Body> {
    witness::http::router(h.witness.clone())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/add-checkpoint")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_string(res: axum::http::Response<Body>) -> String {
    let bytes = axum::body::to_bytes(res.into_body(), 64 * 1024).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn success_returns_signature_line() {
    let h = Harness::new();
    let res = post(&h, h.honest_request(0, 1)).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_string(res).await;
    assert!(body.starts_with(&format!("— {WITNESS_NAME} ")));
    assert!(body.ends_with('\n'));
    assert_eq!(body.lines().count(), 1);
}

#[tokio::test]
async fn conflict_reports_current_size() {
    let h = Harness::new();
    assert_eq!(post(&h, h.honest_request(0, 1)).await.status(), StatusCode::OK);

    let res = post(&h, h.honest_request(0, 5)).await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(
        res.headers().get("content-type").unwrap(),
        "text/x.tlog.size"
    );
    assert_eq!(body_string(res).await, "1\n");
}

#[tokio::test]
async fn unknown_log_is_forbidden() {
    let h = Harness::new();
    let mut request = h.honest_request(0, 1);
    // Flip a character of the origin in both the note body and the
    // signature line name so the note stays well-formed.
    for i in 0..request.len() {
        if request[i] == b'4' {
            request[i] = b'5';
        }
    }
    let res = post(&h, request).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body_string(res).await.contains("unknown log"));
}

#[tokio::test]
async fn invalid_signature_is_forbidden() {
    let h = Harness::new();
    let res = post(&h, corrupt_signature(&h.honest_request(0, 1))).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body_string(res).await.contains("invalid signature"));
}

#[tokio::test]
async fn missing_proof_is_unprocessable() {
    let h = Harness::new();
    assert_eq!(post(&h, h.honest_request(0, 1)).await.status(), StatusCode::OK);

    let res = post(&h, h.request(1, &[], &h.signed_note(3))).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_string(res).await.contains("bad consistency proof"));
}

#[tokio::test]
async fn garbage_is_bad_request() {
    let h = Harness::new();
    let res = post(&h, b"not an add-checkpoint request".to_vec()).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let h = Harness::new();
    let res = post(&h, vec![b'a'; 64 * 1024]).await;
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
