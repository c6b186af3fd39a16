//! Filesystem object store.
//!
//! Layout (§4.A):
//!
//! ```text
//! STORAGE_ROOT/<bucket>/...<key>        committed object bytes
//! STORAGE_ROOT/.tmp/<upload_id>/part.<N>  in-flight multipart part bytes
//! ```
//!
//! Bytes and metadata rows are owned by two different layers (the
//! filesystem here, the SQLite repository in `crate::db`); handlers
//! coordinate the two, always writing bytes before committing the row.

use super::traits::StorageError;
use md5::{Digest, Md5};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Reserved directory name for in-flight multipart part bytes.
pub const TMP_DIR: &str = ".tmp";

/// ENOSPC raw error code on Linux and macOS.
const ENOSPC: i32 = 28;

fn io_to_storage_error(e: std::io::Error) -> StorageError {
    if e.raw_os_error() == Some(ENOSPC) {
        StorageError::DiskFull
    } else {
        StorageError::Io(e)
    }
}

async fn path_exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Write `data` to `path` by writing to a temp file in the same directory,
/// fsyncing, then renaming into place. Matches the atomic-write idiom this
/// layer has always used for durability; not required by the core spec
/// (last-committed-write-wins is sufficient) but costs nothing extra.
async fn atomic_write(path: &Path, data: Vec<u8>) -> Result<(), StorageError> {
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::Other("path has no parent directory".into()))?
        .to_path_buf();
    let path = path.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_to_storage_error)?;
        tmp.write_all(&data).map_err(io_to_storage_error)?;
        tmp.as_file().sync_all().map_err(io_to_storage_error)?;
        tmp.persist(&path).map_err(|e| io_to_storage_error(e.error))?;
        Ok(())
    })
    .await
    .map_err(|e| StorageError::Other(format!("spawn_blocking join failed: {e}")))?
}

/// The result of saving or combining object bytes.
pub struct SavedBytes {
    pub filepath: PathBuf,
    pub size: i64,
    /// Hex md5 of the bytes, unquoted.
    pub etag_hex: String,
}

/// Filesystem-backed object store rooted at a single directory.
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open (creating if absent) the storage root and its `.tmp` directory.
    pub async fn open(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await.map_err(io_to_storage_error)?;
        fs::create_dir_all(root.join(TMP_DIR))
            .await
            .map_err(io_to_storage_error)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.root.join(bucket)
    }

    /// The path an object key maps to under a bucket directory, honoring
    /// `/`-embedded keys as intermediate directories.
    fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        let mut path = self.bucket_dir(bucket);
        for segment in key.split('/') {
            path.push(segment);
        }
        path
    }

    /// The path a committed object lives at. Exposed so callers that need
    /// to persist the filepath (e.g. after `combine_parts`) can compute it
    /// without re-deriving the directory layout themselves.
    pub fn object_filepath(&self, bucket: &str, key: &str) -> PathBuf {
        self.object_path(bucket, key)
    }

    fn tmp_upload_dir(&self, upload_id: &str) -> PathBuf {
        self.root.join(TMP_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: i64) -> PathBuf {
        self.tmp_upload_dir(upload_id).join(format!("part.{part_number}"))
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_to_storage_error)?;
        }
        Ok(())
    }

    /// mkdir, idempotent.
    pub async fn create_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        fs::create_dir_all(self.bucket_dir(bucket))
            .await
            .map_err(io_to_storage_error)?;
        Ok(())
    }

    /// Remove the bucket directory. Caller guarantees it is empty of
    /// objects (the repository is the source of truth for emptiness);
    /// this only needs to clean up the directory tree itself.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<(), StorageError> {
        let dir = self.bucket_dir(bucket);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_to_storage_error(e)),
        }
    }

    /// Write full object bytes, returning `(size, etag_hex)`. `etag_hex`
    /// is unquoted hex md5; callers quote it before persisting/emitting.
    pub async fn save_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: &[u8],
    ) -> Result<SavedBytes, StorageError> {
        let path = self.object_path(bucket, key);
        self.ensure_parent(&path).await?;
        let etag_hex = hex::encode(Md5::digest(bytes));
        atomic_write(&path, bytes.to_vec()).await?;
        debug!(bucket, key, size = bytes.len(), "wrote object");
        Ok(SavedBytes {
            filepath: path,
            size: bytes.len() as i64,
            etag_hex,
        })
    }

    /// Read the full contents of a committed object.
    pub async fn read_object(&self, filepath: &Path) -> Result<Vec<u8>, StorageError> {
        fs::read(filepath).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(filepath.display().to_string())
            } else {
                io_to_storage_error(e)
            }
        })
    }

    /// Open a streaming reader over a committed object's bytes.
    pub async fn open_object_stream(
        &self,
        filepath: &Path,
    ) -> Result<ReaderStream<fs::File>, StorageError> {
        let file = fs::File::open(filepath).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(filepath.display().to_string())
            } else {
                io_to_storage_error(e)
            }
        })?;
        Ok(ReaderStream::new(file))
    }

    /// Remove a file, ignoring "not found".
    pub async fn delete_object(&self, filepath: &Path) -> Result<(), StorageError> {
        match fs::remove_file(filepath).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_to_storage_error(e)),
        }
    }

    /// Write part bytes to `.tmp/<upload_id>/part.<N>`, returning
    /// `(filepath, etag_hex, size)`.
    pub async fn save_part(
        &self,
        upload_id: &str,
        part_number: i64,
        bytes: &[u8],
    ) -> Result<SavedBytes, StorageError> {
        let path = self.part_path(upload_id, part_number);
        self.ensure_parent(&path).await?;
        let etag_hex = hex::encode(Md5::digest(bytes));
        atomic_write(&path, bytes.to_vec()).await?;
        Ok(SavedBytes {
            filepath: path,
            size: bytes.len() as i64,
            etag_hex,
        })
    }

    /// Combine part files into the final object, in ascending
    /// `part_number` order, appending each part's bytes to the
    /// destination and deleting the part file as it is consumed. Only
    /// one part's bytes are held in memory at a time, not the whole
    /// object. Returns `(total_size, multipart_etag)` where
    /// `multipart_etag` is the full quoted `"<hex>-<n>"` S3 multipart
    /// ETag.
    pub async fn combine_parts(
        &self,
        bucket: &str,
        key: &str,
        parts: &[(i64, PathBuf)],
    ) -> Result<(i64, String), StorageError> {
        use tokio::io::AsyncWriteExt;

        let dest = self.object_path(bucket, key);
        self.ensure_parent(&dest).await?;

        let tmp = NamedTempFile::new_in(dest.parent().expect("ensure_parent created it"))
            .map_err(io_to_storage_error)?;
        let (tmp_file, tmp_path) = tmp.into_parts();
        let mut tmp_file = fs::File::from_std(tmp_file);

        let mut total_size: i64 = 0;
        let mut digest_concat = Vec::with_capacity(parts.len() * 16);

        for (_part_number, part_path) in parts {
            let data = fs::read(part_path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StorageError::NotFound(part_path.display().to_string())
                } else {
                    io_to_storage_error(e)
                }
            })?;
            let digest: [u8; 16] = Md5::digest(&data).into();
            digest_concat.extend_from_slice(&digest);
            total_size += data.len() as i64;
            tmp_file.write_all(&data).await.map_err(io_to_storage_error)?;
        }
        tmp_file.sync_all().await.map_err(io_to_storage_error)?;
        drop(tmp_file);
        tmp_path.persist(&dest).map_err(|e| io_to_storage_error(e.error))?;

        for (_part_number, part_path) in parts {
            let _ = fs::remove_file(part_path).await;
        }

        let etag = format!(
            "\"{}-{}\"",
            hex::encode(Md5::digest(&digest_concat)),
            parts.len()
        );
        Ok((total_size, etag))
    }

    /// Recursively remove `.tmp/<upload_id>/`. Best-effort: callers treat
    /// this as cleanup, not a correctness-bearing step.
    pub async fn cleanup_parts(&self, upload_id: &str) -> Result<(), StorageError> {
        let dir = self.tmp_upload_dir(upload_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_to_storage_error(e)),
        }
    }

    /// List upload ids with a tmp directory on disk (for the startup sweep).
    pub async fn list_tmp_upload_ids(&self) -> Result<Vec<String>, StorageError> {
        let dir = self.root.join(TMP_DIR);
        let mut ids = Vec::new();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(io_to_storage_error(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(io_to_storage_error)? {
            if entry.file_type().await.map_err(io_to_storage_error)?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    ids.push(name.to_string());
                }
            }
        }
        Ok(ids)
    }

    /// Remove a stray `.tmp/<upload_id>` directory with no backing row.
    pub async fn remove_tmp_upload_dir(&self, upload_id: &str) -> Result<(), StorageError> {
        self.cleanup_parts(upload_id).await
    }

    /// Recursively list every committed object file path under the
    /// storage root (excluding `.tmp`), for the startup orphan sweep.
    pub async fn walk_all_object_files(&self) -> Result<Vec<PathBuf>, StorageError> {
        let mut out = Vec::new();
        let mut bucket_entries = match fs::read_dir(&self.root).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(io_to_storage_error(e)),
        };
        while let Some(bucket_entry) = bucket_entries.next_entry().await.map_err(io_to_storage_error)? {
            let bucket_path = bucket_entry.path();
            if bucket_entry.file_name() == TMP_DIR {
                continue;
            }
            if bucket_entry.file_type().await.map_err(io_to_storage_error)?.is_dir() {
                walk_dir_recursive(&bucket_path, &mut out).await?;
            }
        }
        Ok(out)
    }
}

fn walk_dir_recursive<'a>(
    dir: &'a Path,
    out: &'a mut Vec<PathBuf>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), StorageError>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = fs::read_dir(dir).await.map_err(io_to_storage_error)?;
        while let Some(entry) = entries.next_entry().await.map_err(io_to_storage_error)? {
            let path = entry.path();
            if entry.file_type().await.map_err(io_to_storage_error)?.is_dir() {
                walk_dir_recursive(&path, out).await?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    async fn store() -> (ObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectStore::open(dir.path().to_path_buf()).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn save_and_read_object_round_trips() {
        let (store, _dir) = store().await;
        store.create_bucket("b").await.unwrap();
        let saved = store.save_object("b", "hello.txt", b"hi").await.unwrap();
        assert_eq!(saved.size, 2);
        assert_eq!(saved.etag_hex, format!("{:x}", Md5::digest(b"hi")));
        let bytes = store.read_object(&saved.filepath).await.unwrap();
        assert_eq!(bytes, b"hi");
    }

    #[tokio::test]
    async fn save_object_creates_nested_directories() {
        let (store, _dir) = store().await;
        store.create_bucket("b").await.unwrap();
        let saved = store.save_object("b", "a/b/c.txt", b"x").await.unwrap();
        assert!(saved.filepath.ends_with("b/a/b/c.txt"));
        assert_eq!(store.read_object(&saved.filepath).await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn combine_parts_concatenates_in_order_and_computes_multipart_etag() {
        let (store, _dir) = store().await;
        store.create_bucket("b").await.unwrap();
        let p1 = store.save_part("u1", 1, &[b'A'; 10]).await.unwrap();
        let p2 = store.save_part("u1", 2, &[b'B'; 5]).await.unwrap();

        let (size, etag) = store
            .combine_parts("b", "big", &[(1, p1.filepath.clone()), (2, p2.filepath.clone())])
            .await
            .unwrap();
        assert_eq!(size, 15);

        let mut concat = Vec::new();
        concat.extend_from_slice(&Md5::digest([b'A'; 10]));
        concat.extend_from_slice(&Md5::digest([b'B'; 5]));
        let expected = format!("\"{}-2\"", hex::encode(Md5::digest(&concat)));
        assert_eq!(etag, expected);

        assert!(!path_exists(&p1.filepath).await);
        assert!(!path_exists(&p2.filepath).await);
    }

    proptest! {
        /// §8: for any sequence of parts, the committed object's bytes
        /// equal their concatenation in order, and its ETag equals
        /// `"<md5_hex(concat(md5_raw(p1)...md5_raw(pn)))>-n"`.
        #[test]
        fn combine_parts_matches_concat_and_etag_invariant(
            parts in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..6)
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let (store, _dir) = store().await;
                store.create_bucket("b").await.unwrap();

                let upload_id = "prop-u";
                let mut saved_paths = Vec::new();
                for (i, part) in parts.iter().enumerate() {
                    let saved = store.save_part(upload_id, (i + 1) as i64, part).await.unwrap();
                    saved_paths.push(((i + 1) as i64, saved.filepath));
                }

                let (size, etag) = store.combine_parts("b", "combined", &saved_paths).await.unwrap();

                let expected_bytes: Vec<u8> = parts.iter().flatten().copied().collect();
                prop_assert_eq!(size as usize, expected_bytes.len());

                let mut digest_concat = Vec::new();
                for part in &parts {
                    digest_concat.extend_from_slice(&Md5::digest(part));
                }
                let expected_etag = format!("\"{}-{}\"", hex::encode(Md5::digest(&digest_concat)), parts.len());
                prop_assert_eq!(etag, expected_etag);

                let committed = store.read_object(&store.object_path("b", "combined")).await.unwrap();
                prop_assert_eq!(committed, expected_bytes);
            });
        }
    }

    #[tokio::test]
    async fn cleanup_parts_removes_tmp_dir() {
        let (store, _dir) = store().await;
        store.save_part("u2", 1, b"x").await.unwrap();
        store.cleanup_parts("u2").await.unwrap();
        assert!(store.list_tmp_upload_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_object_ignores_missing_file() {
        let (store, _dir) = store().await;
        store
            .delete_object(&store.object_path("b", "missing"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_bucket_removes_directory_tree() {
        let (store, _dir) = store().await;
        store.create_bucket("b").await.unwrap();
        store.save_object("b", "k", b"x").await.unwrap();
        store.delete_bucket("b").await.unwrap();
        assert!(!path_exists(&store.bucket_dir("b")).await);
    }
}
