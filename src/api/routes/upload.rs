use crate::api::state::AppState;
use crate::error::{ApiError, Error};
use crate::feed::parse_feed;
use axum::{
    Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{error, info};

/// POST /upload - Run the pipeline over an uploaded feed
#[utoipa::path(
    post,
    path = "/upload",
    tag = "pipeline",
    request_body(content = Vec<u8>, description = "Product feed upload (multipart/form-data, field `file`)", content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Run finished and the output document was sealed", body = crate::types::RunReport),
        (status = 400, description = "No feed in the `file` field", body = ApiError),
        (status = 409, description = "Another run is in progress", body = ApiError),
        (status = 422, description = "Feed could not be parsed", body = ApiError),
        (status = 502, description = "Report service failed a group", body = ApiError),
        (status = 504, description = "A job did not finish in time", body = ApiError)
    )
)]
pub async fn upload_feed(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut feed: Option<(String, Bytes)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiError::new(
                        "invalid_multipart",
                        format!("Failed to read upload: {e}"),
                    )),
                )
                    .into_response();
            }
        };

        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("feed.xml").to_string();
        match field.bytes().await {
            Ok(bytes) => feed = Some((filename, bytes)),
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiError::new(
                        "invalid_file",
                        format!("Failed to read file: {e}"),
                    )),
                )
                    .into_response();
            }
        }
    }

    let Some((filename, bytes)) = feed else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new(
                "missing_file",
                "No feed provided in 'file' field",
            )),
        )
            .into_response();
    };

    let run_guard = match state.try_begin_run() {
        Ok(guard) => guard,
        Err(e) => return e.into_response(),
    };

    let config = state.pipeline.config();
    let products = match parse_feed(&bytes, config.feed.price_difference) {
        Ok(products) => products,
        Err(e) => return e.into_response(),
    };
    info!(%filename, bytes = bytes.len(), products = products.len(), "feed uploaded");

    // The run owns the lock and outlives this handler; a dropped request cancels it.
    let cancel = state.shutdown.child_token();
    let _cancel_on_disconnect = cancel.clone().drop_guard();
    let pipeline = state.pipeline.clone();
    let run = tokio::spawn(async move {
        let outcome = pipeline.run_to_file(products, &cancel).await;
        drop(run_guard);
        outcome
    });

    let outcome = match run.await {
        Ok(outcome) => outcome,
        Err(e) => Err(Error::Other(format!("pipeline task failed: {e}"))),
    };
    match outcome {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            error!(%filename, error = %e, "pipeline run failed");
            e.into_response()
        }
    }
}
