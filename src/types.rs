//! Core types shared across the object store, metadata repository, and
//! request dispatcher.

use std::fmt;

/// Errors that can occur when validating user-provided bucket/key inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValidationError(String);

impl fmt::Display for KeyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for KeyValidationError {}

/// An S3 object key, split into the directory prefix and filename the way
/// the filesystem layout (`STORAGE_ROOT/<bucket>/<prefix>/<filename>`)
/// needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub bucket: String,
    pub prefix: String,
    pub filename: String,
}

impl ObjectKey {
    /// Parse a full S3-style key into components.
    pub fn parse(bucket: &str, key: &str) -> Self {
        let key = key.trim_start_matches('/');
        let (prefix, filename) = match key.rfind('/') {
            Some(idx) => (key[..idx].to_string(), key[idx + 1..].to_string()),
            None => (String::new(), key.to_string()),
        };
        Self {
            bucket: bucket.to_string(),
            prefix,
            filename,
        }
    }

    /// The full key (prefix + filename), as stored in the `Object.name` column.
    pub fn full_key(&self) -> String {
        if self.prefix.is_empty() {
            self.filename.clone()
        } else {
            format!("{}/{}", self.prefix, self.filename)
        }
    }

    /// Validate this key for object operations (PUT/GET/HEAD/DELETE).
    pub fn validate_object(&self) -> Result<(), KeyValidationError> {
        validate_key_path(&self.prefix, true)?;
        validate_key_path(&self.filename, false)?;
        if self.filename.is_empty() {
            return Err(KeyValidationError(
                "object key must not be empty".to_string(),
            ));
        }
        if self.filename == "." || self.filename == ".." {
            return Err(KeyValidationError("invalid object filename".to_string()));
        }
        Ok(())
    }

    /// Validate a list/query prefix for traversal and encoding hazards.
    pub fn validate_prefix(prefix: &str) -> Result<(), KeyValidationError> {
        validate_key_path(prefix, true)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.full_key())
    }
}

fn validate_key_path(value: &str, allow_slashes: bool) -> Result<(), KeyValidationError> {
    if value.contains('\0') {
        return Err(KeyValidationError(
            "key must not contain NUL bytes".to_string(),
        ));
    }
    if value.contains('\\') {
        return Err(KeyValidationError(
            "key must not contain backslashes".to_string(),
        ));
    }
    if !allow_slashes && value.contains('/') {
        return Err(KeyValidationError("key must not contain '/'".to_string()));
    }

    for segment in value.split('/') {
        if segment == ".." {
            return Err(KeyValidationError(
                "key must not contain '..' path segments".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate a bucket name. S3 bucket naming rules are broader than this;
/// the core only needs to rule out names that would escape or collide with
/// the reserved filesystem layout (`.tmp`, see §4.A/§6 of the spec this
/// layer implements).
pub fn validate_bucket_name(name: &str) -> Result<(), KeyValidationError> {
    if name.is_empty() {
        return Err(KeyValidationError("bucket name must not be empty".into()));
    }
    if name == ".tmp" {
        return Err(KeyValidationError(
            "'.tmp' is reserved and cannot be used as a bucket name".into(),
        ));
    }
    validate_key_path(name, false)
}
