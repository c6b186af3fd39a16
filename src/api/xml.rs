//! S3 XML response builders and the `CompleteMultipartUpload` request
//! parser (§4.D, §6). Namespace `http://s3.amazonaws.com/doc/2006-03-01/`.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Escape special XML characters.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn format_last_modified(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Empty `LocationConstraint` element (implies `us-east-1`).
pub fn location_constraint_xml() -> String {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<LocationConstraint xmlns="http://s3.amazonaws.com/doc/2006-03-01/"/>"#
        .to_string()
}

pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

impl InitiateMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <UploadId>{}</UploadId>
</InitiateMultipartUploadResult>"#,
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.upload_id),
        )
    }
}

pub struct CompleteMultipartUploadResult {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

impl CompleteMultipartUploadResult {
    pub fn to_xml(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Location>{}</Location>
  <Bucket>{}</Bucket>
  <Key>{}</Key>
  <ETag>{}</ETag>
</CompleteMultipartUploadResult>"#,
            escape_xml(&self.location),
            escape_xml(&self.bucket),
            escape_xml(&self.key),
            escape_xml(&self.etag),
        )
    }
}

/// A single `Contents` entry in a `ListBucketResult`.
pub struct ListedObject {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub etag: String,
    pub size: i64,
}

#[derive(Default)]
pub struct ListBucketResult {
    pub name: String,
    pub prefix: String,
    pub max_keys: u32,
    pub is_truncated: bool,
    pub contents: Vec<ListedObject>,
    pub continuation_token: Option<String>,
    pub next_continuation_token: Option<String>,
}

impl ListBucketResult {
    pub fn to_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str(r#"<?xml version="1.0" encoding="UTF-8"?>"#);
        xml.push('\n');
        xml.push_str(r#"<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">"#);
        xml.push('\n');
        xml.push_str(&format!("  <Name>{}</Name>\n", escape_xml(&self.name)));
        xml.push_str(&format!("  <Prefix>{}</Prefix>\n", escape_xml(&self.prefix)));
        xml.push_str(&format!("  <MaxKeys>{}</MaxKeys>\n", self.max_keys));
        xml.push_str(&format!(
            "  <IsTruncated>{}</IsTruncated>\n",
            self.is_truncated
        ));
        if let Some(token) = &self.continuation_token {
            xml.push_str(&format!(
                "  <ContinuationToken>{}</ContinuationToken>\n",
                escape_xml(token)
            ));
        }
        if let Some(token) = &self.next_continuation_token {
            xml.push_str(&format!(
                "  <NextContinuationToken>{}</NextContinuationToken>\n",
                escape_xml(token)
            ));
        }
        for obj in &self.contents {
            xml.push_str("  <Contents>\n");
            xml.push_str(&format!("    <Key>{}</Key>\n", escape_xml(&obj.key)));
            xml.push_str(&format!(
                "    <LastModified>{}</LastModified>\n",
                format_last_modified(&obj.last_modified)
            ));
            xml.push_str(&format!("    <ETag>{}</ETag>\n", escape_xml(&obj.etag)));
            xml.push_str(&format!("    <Size>{}</Size>\n", obj.size));
            xml.push_str("    <StorageClass>STANDARD</StorageClass>\n");
            xml.push_str("  </Contents>\n");
        }
        xml.push_str("</ListBucketResult>");
        xml
    }
}

/// Raw `CompleteMultipartUpload` request body shape. The root element's
/// namespace URI is read at parse time (§4.D): the request may or may not
/// declare the S3 namespace, so this struct is deserialized against the
/// local (unqualified) element names, matching quick-xml's default
/// namespace-agnostic behavior for untagged names.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CompletePart {
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUploadXml {
    #[serde(rename = "Part", default)]
    part: Vec<CompletePart>,
}

#[derive(Debug, thiserror::Error)]
#[error("malformed CompleteMultipartUpload body: {0}")]
pub struct CompleteMultipartUploadParseError(String);

/// Parse a `CompleteMultipartUpload` request body into
/// `(part_number, etag)` pairs with surrounding ETag quotes stripped.
pub fn parse_complete_multipart_upload(
    body: &str,
) -> Result<Vec<(u32, String)>, CompleteMultipartUploadParseError> {
    let parsed: CompleteMultipartUploadXml = quick_xml::de::from_str(body)
        .map_err(|e| CompleteMultipartUploadParseError(e.to_string()))?;
    Ok(parsed
        .part
        .into_iter()
        .map(|p| (p.part_number, p.etag.trim_matches('"').to_string()))
        .collect())
}
