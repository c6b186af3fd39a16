//! Bucket-scoped operations: HeadBucket, CreateBucket, DeleteBucket,
//! GetBucketLocation, ListObjectsV2 (§4.E).

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Extension;

use crate::api::errors::S3Error;
use crate::api::xml::{location_constraint_xml, ListBucketResult, ListedObject};
use crate::db::{Bucket, RepoError, User};
use crate::types::{validate_bucket_name, ObjectKey};

use super::AppState;

/// Reject object keys that would escape the bucket directory (`..`
/// segments, NUL bytes, backslashes) before they ever reach the object
/// store. An invalid key is reported the same way a missing one would
/// be — the caller learns nothing about why the key was rejected.
pub(super) fn validate_key(bucket: &str, key: &str) -> Result<(), S3Error> {
    ObjectKey::parse(bucket, key)
        .validate_object()
        .map_err(|_| S3Error::NoSuchKey {
            resource: format!("/{bucket}/{key}"),
        })
}

/// Resolve a bucket by name and enforce ownership. A bucket owned by
/// someone else is indistinguishable from a missing one (§4.E) — the
/// caller never learns whether the name is taken.
pub(super) fn authorize_bucket(
    repo: &crate::db::Repo,
    user: &User,
    bucket_name: &str,
) -> Result<Bucket, S3Error> {
    let bucket = repo.get_bucket_by_name(bucket_name)?.ok_or_else(|| S3Error::NoSuchBucket {
        resource: format!("/{bucket_name}"),
    })?;
    if bucket.owner_id != user.id {
        return Err(S3Error::NoSuchBucket {
            resource: format!("/{bucket_name}"),
        });
    }
    Ok(bucket)
}

pub async fn head_bucket(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, S3Error> {
    authorize_bucket(&state.repo, &user, &bucket)?;
    Ok(StatusCode::OK)
}

pub async fn create_bucket(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, S3Error> {
    if validate_bucket_name(&bucket).is_err() {
        return Err(S3Error::NotImplemented {
            resource: format!("/{bucket}"),
        });
    }

    match state.repo.create_bucket(&bucket, user.id) {
        Ok(_) => {
            state
                .store
                .create_bucket(&bucket)
                .await
                .map_err(|e| S3Error::internal(format!("/{bucket}"), e))?;
            Ok(StatusCode::OK)
        }
        Err(RepoError::BucketAlreadyExists) => Err(S3Error::BucketAlreadyOwnedByYou {
            resource: format!("/{bucket}"),
        }),
        Err(e) => Err(e.into()),
    }
}

pub async fn delete_bucket(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(bucket): Path<String>,
) -> Result<StatusCode, S3Error> {
    let owned = authorize_bucket(&state.repo, &user, &bucket)?;

    if state.repo.bucket_has_objects(owned.id)? {
        return Err(S3Error::BucketNotEmpty {
            resource: format!("/{bucket}"),
        });
    }

    state
        .store
        .delete_bucket(&bucket)
        .await
        .map_err(|e| S3Error::internal(format!("/{bucket}"), e))?;
    state.repo.delete_bucket(owned.id)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_bucket_location(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(bucket): Path<String>,
) -> Result<impl IntoResponse, S3Error> {
    authorize_bucket(&state.repo, &user, &bucket)?;
    Ok(([("Content-Type", "application/xml")], location_constraint_xml()))
}

pub async fn list_objects_v2(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(bucket): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<impl IntoResponse, S3Error> {
    let owned = authorize_bucket(&state.repo, &user, &bucket)?;

    let prefix = query.get("prefix").cloned().unwrap_or_default();
    if ObjectKey::validate_prefix(&prefix).is_err() {
        return Err(S3Error::NotImplemented {
            resource: format!("/{bucket}"),
        });
    }

    let max_keys: i64 = query
        .get("max-keys")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);
    let continuation_token = query.get("continuation-token").cloned();
    let marker = continuation_token.clone().unwrap_or_default();

    let page = state.repo.list_objects(owned.id, &prefix, &marker, max_keys)?;

    let result = ListBucketResult {
        name: bucket,
        prefix,
        max_keys: max_keys.max(0) as u32,
        is_truncated: page.is_truncated,
        contents: page
            .objects
            .into_iter()
            .map(|o| ListedObject {
                key: o.name,
                last_modified: o.last_modified,
                etag: o.etag,
                size: o.size,
            })
            .collect(),
        continuation_token,
        next_continuation_token: page.next_marker,
    };

    Ok(([("Content-Type", "application/xml")], result.to_xml()))
}
