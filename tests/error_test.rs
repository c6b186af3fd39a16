//! Error response XML compliance tests.
//!
//! Uses a minimal hand-rolled SigV4 signer plus raw `reqwest` (not
//! `aws-sdk-s3`, which parses error bodies into modeled errors) to
//! inspect error codes, status codes, and Content-Type headers directly.

mod common;

use common::{sigv4, TestServer, ACCESS_KEY, SECRET_KEY};

fn signed_request(
    server: &TestServer,
    client: &reqwest::Client,
    method: reqwest::Method,
    path_and_query: &str,
) -> reqwest::RequestBuilder {
    let host = format!("127.0.0.1:{}", server.endpoint().trim_start_matches("http://127.0.0.1:"));
    let (path, query) = path_and_query.split_once('?').unwrap_or((path_and_query, ""));
    let (authorization, amz_date, payload_hash) =
        sigv4::sign_empty_body(ACCESS_KEY, SECRET_KEY, method.as_str(), path, query, &host);

    client
        .request(method, format!("{}{}", server.endpoint(), path_and_query))
        .header("host", host)
        .header("x-amz-date", amz_date)
        .header("x-amz-content-sha256", payload_hash)
        .header("authorization", authorization)
}

#[tokio::test]
async fn nosuchkey_xml_response() {
    let server = TestServer::start().await;
    let client = server.client().await;
    client.create_bucket().bucket("bucket").send().await.expect("create bucket");

    let http = reqwest::Client::new();
    let resp = signed_request(&server, &http, reqwest::Method::GET, "/bucket/nonexistent.txt")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Code>NoSuchKey</Code>"), "expected NoSuchKey, got: {body}");
}

#[tokio::test]
async fn nosuchbucket_xml_response() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let resp = signed_request(&server, &http, reqwest::Method::GET, "/nonexistent-bucket/file.txt")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Code>NoSuchBucket</Code>"), "expected NoSuchBucket, got: {body}");
}

#[tokio::test]
async fn missing_authorization_header_is_access_denied() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let resp = http.get(format!("{}/bucket/anything.txt", server.endpoint())).send().await.unwrap();

    assert_eq!(resp.status().as_u16(), 403);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<Code>AccessDenied</Code>"), "expected AccessDenied, got: {body}");
}

#[tokio::test]
async fn bad_signature_is_access_denied() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let host = server.endpoint().trim_start_matches("http://").to_string();
    let resp = http
        .get(format!("{}/bucket/anything.txt", server.endpoint()))
        .header("host", host)
        .header("x-amz-date", "20240101T000000Z")
        .header(
            "x-amz-content-sha256",
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        )
        .header(
            "authorization",
            "AWS4-HMAC-SHA256 Credential=AKIATESTACCESSKEY0001/20240101/us-east-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature=0000000000000000000000000000000000000000000000000000000000000",
        )
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 403);
}

#[tokio::test]
async fn error_content_type_is_xml() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let resp = signed_request(&server, &http, reqwest::Method::GET, "/bucket/missing.txt")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
    let ct = resp.headers().get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("");
    assert!(ct.contains("application/xml"), "expected application/xml, got: {ct}");
}

#[tokio::test]
async fn head_nonexistent_bucket_is_404_without_body() {
    let server = TestServer::start().await;
    let http = reqwest::Client::new();

    let resp = signed_request(&server, &http, reqwest::Method::HEAD, "/fakebucket")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 404);
}
