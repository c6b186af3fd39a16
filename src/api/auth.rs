//! AWS Signature Version 4 request verification (§4.C).
//!
//! Presigned-URL (query-string) signing is out of scope; only the
//! `Authorization` header form is accepted.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use hmac::{Hmac, Mac};
use percent_encoding::percent_decode_str;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::db::{Repo, User};

use super::errors::S3Error;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM_PREFIX: &str = "AWS4-HMAC-SHA256 ";

#[derive(Debug)]
struct AuthHeaderFields {
    access_key: String,
    date_stamp: String,
    region: String,
    service: String,
    signed_headers: String,
    signature: String,
}

/// Parse the `Authorization` header value into its `Credential`,
/// `SignedHeaders`, and `Signature` components (§4.C Header parsing).
fn parse_auth_header(value: &str) -> Option<AuthHeaderFields> {
    let rest = value.strip_prefix(ALGORITHM_PREFIX)?;

    let mut credential = None;
    let mut signed_headers = None;
    let mut signature = None;

    for field in rest.split(',') {
        let field = field.trim();
        let (key, val) = field.split_once('=')?;
        match key.trim() {
            "Credential" => credential = Some(val.trim().to_string()),
            "SignedHeaders" => signed_headers = Some(val.trim().to_string()),
            "Signature" => signature = Some(val.trim().to_string()),
            _ => {}
        }
    }

    let credential = credential?;
    let signed_headers = signed_headers?;
    let signature = signature?;

    let mut parts = credential.splitn(5, '/');
    let access_key = parts.next()?.to_string();
    let date_stamp = parts.next()?.to_string();
    let region = parts.next()?.to_string();
    let service = parts.next()?.to_string();
    let terminator = parts.next()?;
    if terminator != "aws4_request" {
        return None;
    }

    Some(AuthHeaderFields {
        access_key,
        date_stamp,
        region,
        service,
        signed_headers,
        signature,
    })
}

/// Build `CANONICAL_QUERY` from the raw query string: parse into (key,
/// value) pairs preserving blank values, sort by raw key bytes, rejoin
/// as `k=v` pairs (§4.C).
fn build_canonical_query_string(raw_query: &str) -> String {
    if raw_query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(&str, &str)> = raw_query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k, v),
            None => (pair, ""),
        })
        .collect();
    pairs.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Build `CANONICAL_HEADERS` from exactly the headers named in
/// `SignedHeaders`, lowercased name, value as delivered, sorted by name.
fn build_canonical_headers(headers: &HeaderMap, signed_headers: &str) -> Option<String> {
    let mut names: Vec<&str> = signed_headers.split(';').collect();
    names.sort_unstable();

    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let value = headers.get(name)?.to_str().ok()?;
        lines.push(format!("{name}:{value}\n"));
    }
    Some(lines.concat())
}

/// Percent-decode the URL path exactly once (§4.C: "percent-decoded
/// once"), matching `original_source/auth.py`'s `unquote(request.url.path)`.
fn percent_decode_once(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Four chained HMAC-SHA256 operations deriving the request signing key.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn canonical_request(
    method: &str,
    uri_path: &str,
    canonical_query: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
) -> String {
    format!(
        "{method}\n{uri_path}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    )
}

fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    let digest = Sha256::digest(canonical_request.as_bytes());
    format!("AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}", hex::encode(digest))
}

/// Verify the request's SigV4 signature against `user.secret_key` and
/// return `Some(())` on a constant-time match.
fn verify_signature(
    user: &User,
    method: &str,
    uri_path: &str,
    raw_query: &str,
    headers: &HeaderMap,
    fields: &AuthHeaderFields,
) -> Option<()> {
    let amz_date = headers.get("x-amz-date")?.to_str().ok()?;
    let payload_hash = headers.get("x-amz-content-sha256")?.to_str().ok()?;

    let canonical_query = build_canonical_query_string(raw_query);
    let canonical_headers = build_canonical_headers(headers, &fields.signed_headers)?;

    let request = canonical_request(
        method,
        uri_path,
        &canonical_query,
        &canonical_headers,
        &fields.signed_headers,
        payload_hash,
    );

    let scope = format!(
        "{}/{}/{}/aws4_request",
        fields.date_stamp, fields.region, fields.service
    );
    let to_sign = string_to_sign(amz_date, &scope, &request);

    let signing_key =
        derive_signing_key(&user.secret_key, &fields.date_stamp, &fields.region, &fields.service);
    let computed = hex::encode(hmac_sha256(&signing_key, to_sign.as_bytes()));

    if computed.as_bytes().ct_eq(fields.signature.as_bytes()).into() {
        Some(())
    } else {
        None
    }
}

/// Axum middleware: authenticates every request, attaching the
/// matched `User` to the request extensions on success.
pub async fn sigv4_auth_middleware(
    State(repo): State<Arc<Repo>>,
    mut request: Request,
    next: Next,
) -> Result<Response, S3Error> {
    let headers = request.headers().clone();
    let method = request.method().as_str().to_string();
    let uri_path = percent_decode_once(request.uri().path());
    let raw_query = request.uri().query().unwrap_or("").to_string();

    let auth_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(S3Error::AuthFailed)?;

    let fields = parse_auth_header(auth_header).ok_or(S3Error::AuthFailed)?;

    let user = repo
        .get_user_by_access_key(&fields.access_key)
        .map_err(|_| S3Error::AuthFailed)?
        .ok_or(S3Error::AuthFailed)?;

    verify_signature(&user, &method, &uri_path, &raw_query, &headers, &fields)
        .ok_or(S3Error::AuthFailed)?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Compute the signature for a fully-specified set of canonical-request
/// inputs, bypassing header-map plumbing. Exists so property tests can
/// mutate one field at a time without constructing HTTP headers.
#[cfg(test)]
fn sign(
    secret_key: &str,
    method: &str,
    uri_path: &str,
    canonical_query: &str,
    canonical_headers: &str,
    signed_headers: &str,
    payload_hash: &str,
    amz_date: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> String {
    let request = canonical_request(
        method,
        uri_path,
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash,
    );
    let scope = format!("{date_stamp}/{region}/{service}/aws4_request");
    let to_sign = string_to_sign(amz_date, &scope, &request);
    let key = derive_signing_key(secret_key, date_stamp, region, service);
    hex::encode(hmac_sha256(&key, to_sign.as_bytes()))
}
