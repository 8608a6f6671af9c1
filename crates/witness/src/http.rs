// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! The HTTP serving shell for the witness.
//!
//! One route, `POST /add-checkpoint`, maps pipeline outcomes onto statuses:
//!
//! | outcome | status |
//! |---|---|
//! | cosigned | 200, body is the signature line |
//! | malformed envelope, proof, or checkpoint | 400 |
//! | unknown log or invalid signature | 403 |
//! | old size mismatch | 409, `text/x.tlog.size` body with the current size |
//! | bad consistency proof | 422 |
//! | store or signer failure | 500 |

use crate::witness::{AddCheckpointError, Witness};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use std::time::Duration;

/// Maximum accepted add-checkpoint request body.
const MAX_REQUEST_BODY: usize = 10 * 1024;

/// Deadline for processing a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the witness router.
pub fn router(witness: Arc<Witness>) -> Router {
    Router::new()
        .route("/add-checkpoint", post(add_checkpoint))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY))
        .with_state(witness)
}

async fn add_checkpoint(State(witness): State<Arc<Witness>>, body: Bytes) -> Response {
    let work = tokio::task::spawn_blocking(move || witness.process_add_checkpoint(&body));
    match tokio::time::timeout(REQUEST_TIMEOUT, work).await {
        Ok(Ok(Ok(cosig))) => (StatusCode::OK, cosig).into_response(),
        Ok(Ok(Err(err))) => error_response(&err),
        Ok(Err(join_err)) => {
            log::error!("add-checkpoint handler failed: {join_err}");
            internal_response()
        }
        Err(_) => {
            log::error!("add-checkpoint request timed out");
            internal_response()
        }
    }
}

fn error_response(err: &AddCheckpointError) -> Response {
    let status = match err {
        AddCheckpointError::BadRequest => StatusCode::BAD_REQUEST,
        AddCheckpointError::UnknownLog | AddCheckpointError::InvalidSignature => {
            StatusCode::FORBIDDEN
        }
        AddCheckpointError::BadProof => StatusCode::UNPROCESSABLE_ENTITY,
        AddCheckpointError::Conflict { known_size } => {
            return (
                StatusCode::CONFLICT,
                [(header::CONTENT_TYPE, "text/x.tlog.size")],
                format!("{known_size}\n"),
            )
                .into_response();
        }
        AddCheckpointError::Internal(msg) => {
            log::error!("internal error processing add-checkpoint: {msg}");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, format!("{err}\n")).into_response()
}

fn internal_response() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal error\n").into_response()
}
