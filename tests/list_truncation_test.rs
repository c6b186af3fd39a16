//! ListObjectsV2 pagination exhaustiveness: uploads enough objects to
//! force several pages and verifies that paging through with
//! `continuation-token` visits every key exactly once, with no drops
//! or duplicates, regardless of `max-keys`.

mod common;

use aws_sdk_s3::primitives::ByteStream;
use common::TestServer;
use std::collections::BTreeSet;

const OBJECT_COUNT: usize = 250;
const PAGE_SIZE: i32 = 37; // deliberately not a divisor of OBJECT_COUNT

#[tokio::test]
async fn pagination_visits_every_key_exactly_once() {
    let server = TestServer::start().await;
    let client = server.client().await;
    client.create_bucket().bucket("bucket").send().await.expect("create bucket");

    let mut expected = BTreeSet::new();
    for i in 0..OBJECT_COUNT {
        let key = format!("artifacts/{i:05}.bin");
        client
            .put_object()
            .bucket("bucket")
            .key(&key)
            .body(ByteStream::from(format!("payload-{i}").into_bytes()))
            .send()
            .await
            .unwrap_or_else(|e| panic!("PUT {key} failed: {e}"));
        expected.insert(key);
    }

    let mut seen = BTreeSet::new();
    let mut continuation_token: Option<String> = None;
    let mut pages = 0;

    loop {
        let mut request = client.list_objects_v2().bucket("bucket").max_keys(PAGE_SIZE);
        if let Some(token) = &continuation_token {
            request = request.continuation_token(token);
        }
        let page = request.send().await.expect("LIST page should succeed");
        pages += 1;

        for obj in page.contents() {
            let key = obj.key().expect("listed object has a key").to_string();
            assert!(seen.insert(key.clone()), "key {key} appeared in more than one page");
        }

        if page.is_truncated().unwrap_or(false) {
            continuation_token = page.next_continuation_token().map(String::from);
            assert!(continuation_token.is_some(), "truncated page must carry a continuation token");
        } else {
            break;
        }
    }

    assert_eq!(seen, expected, "pagination must visit every key exactly once");
    assert!(pages > 1, "test setup should force multiple pages, got {pages}");
}

#[tokio::test]
async fn prefix_filter_excludes_non_matching_keys() {
    let server = TestServer::start().await;
    let client = server.client().await;
    client.create_bucket().bucket("bucket").send().await.expect("create bucket");

    for i in 0..10 {
        client
            .put_object()
            .bucket("bucket")
            .key(format!("releases/v{i}/build.zip"))
            .body(ByteStream::from(b"x".to_vec()))
            .send()
            .await
            .expect("PUT should succeed");
    }
    for i in 0..5 {
        client
            .put_object()
            .bucket("bucket")
            .key(format!("scratch/tmp{i}.log"))
            .body(ByteStream::from(b"x".to_vec()))
            .send()
            .await
            .expect("PUT should succeed");
    }

    let listed = client
        .list_objects_v2()
        .bucket("bucket")
        .prefix("releases/")
        .send()
        .await
        .expect("LIST should succeed");

    assert_eq!(listed.contents().len(), 10);
    assert!(listed.contents().iter().all(|o| o.key().unwrap().starts_with("releases/")));
}
