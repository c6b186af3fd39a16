//! Request dispatcher: disambiguates the twelve S3 operations by
//! `(method, path shape, query parameters)` per §4.E, then delegates to
//! the per-resource handler modules.

mod bucket;
mod multipart;
mod object;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Router};

use crate::db::{Repo, User};
use crate::storage::ObjectStore;

use super::errors::S3Error;

/// Shared handles every handler needs: the metadata repository and the
/// filesystem object store.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repo>,
    pub store: Arc<ObjectStore>,
}

/// `GET /{bucket}`: `location` query selects GetBucketLocation,
/// `list-type=2` selects ListObjectsV2; anything else is an
/// unsupported bucket-level GET.
async fn get_bucket(
    state: State<AppState>,
    user: Extension<User>,
    path: Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, S3Error> {
    if query.contains_key("location") {
        return Ok(bucket::get_bucket_location(state, user, path).await?.into_response());
    }
    if query.get("list-type").map(String::as_str) == Some("2") {
        return Ok(bucket::list_objects_v2(state, user, path, Query(query)).await?.into_response());
    }
    Err(S3Error::NotImplemented {
        resource: format!("/{}", path.0),
    })
}

/// `PUT /{bucket}/{key...}`: `uploadId` + `partNumber` selects
/// UploadPart; otherwise it is a plain PutObject.
async fn put_object_or_part(
    state: State<AppState>,
    user: Extension<User>,
    path: Path<(String, String)>,
    query: Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    let has_upload_id = query.contains_key("uploadId");
    let has_part_number = query.contains_key("partNumber");

    if has_upload_id && has_part_number {
        return multipart::upload_part(state, user, path, query, headers, body).await;
    }
    if has_upload_id {
        return Err(S3Error::InvalidPart {
            message: "partNumber is required when uploadId is present".into(),
        });
    }
    object::put_object(state, user, path, headers, body).await
}

/// `POST /{bucket}/{key...}`: `uploads` selects
/// InitiateMultipartUpload, `uploadId` selects CompleteMultipartUpload.
async fn post_object(
    state: State<AppState>,
    user: Extension<User>,
    path: Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, S3Error> {
    if query.contains_key("uploads") {
        return Ok(multipart::initiate_multipart_upload(state, user, path)
            .await?
            .into_response());
    }
    if query.contains_key("uploadId") {
        return Ok(
            multipart::complete_multipart_upload(state, user, path, Query(query), headers, body)
                .await?
                .into_response(),
        );
    }
    let (bucket, key) = &path.0;
    Err(S3Error::NotImplemented {
        resource: format!("/{bucket}/{key}"),
    })
}

/// `DELETE /{bucket}/{key...}`: `uploadId` selects
/// AbortMultipartUpload; otherwise it is a plain DeleteObject.
async fn delete_object_or_abort(
    state: State<AppState>,
    user: Extension<User>,
    path: Path<(String, String)>,
    query: Query<HashMap<String, String>>,
) -> Result<Response, S3Error> {
    if query.contains_key("uploadId") {
        return Ok(multipart::abort_multipart_upload(state, user, path, query)
            .await?
            .into_response());
    }
    Ok(object::delete_object(state, user, path).await?.into_response())
}

/// Build the application router. The SigV4 auth middleware is layered on
/// top of this in `main.rs` so every route below runs authenticated.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/:bucket",
            get(get_bucket)
                .head(bucket::head_bucket)
                .put(bucket::create_bucket)
                .delete(bucket::delete_bucket),
        )
        .route(
            "/:bucket/*key",
            get(object::get_object)
                .head(object::head_object)
                .put(put_object_or_part)
                .post(post_object)
                .delete(delete_object_or_abort),
        )
        .with_state(state)
}
