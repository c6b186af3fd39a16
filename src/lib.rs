//! S3-compatible object storage server: SigV4 auth, multipart uploads,
//! filesystem object storage with SQLite-backed metadata.

pub mod api;
pub mod config;
pub mod db;
pub mod storage;
pub mod sweep;
pub mod types;
