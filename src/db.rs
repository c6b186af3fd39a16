//! SQLite-backed metadata repository: users, buckets, objects, and
//! multipart upload/part bookkeeping.
//!
//! The whole database is guarded by a single connection behind a mutex.
//! This is deliberately coarse: it also gives us the "transactional lock
//! on the upload row" that completing a multipart upload needs, since the
//! lock is held for the full duration of the insert-object/delete-upload
//! pair.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("bucket not found")]
    NoSuchBucket,
    #[error("object not found")]
    NoSuchKey,
    #[error("multipart upload not found")]
    NoSuchUpload,
    #[error("bucket already exists")]
    BucketAlreadyExists,
    #[error("bucket is not empty")]
    BucketNotEmpty,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub id: i64,
    pub name: String,
    pub owner_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub id: i64,
    pub bucket_id: i64,
    pub name: String,
    pub size: i64,
    pub etag: String,
    pub filepath: String,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub id: String,
    pub bucket_name: String,
    pub object_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MultipartPart {
    pub upload_id: String,
    pub part_number: i64,
    pub etag: String,
    pub filepath: String,
    pub size: i64,
}

#[derive(Debug, Clone)]
pub struct ListObjectsPage {
    pub objects: Vec<Object>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// A handle to the metadata database. Cheap to clone; clones share the
/// same connection and mutex.
#[derive(Clone)]
pub struct Repo {
    conn: Arc<Mutex<Connection>>,
}

impl Repo {
    /// Open (creating if absent) the database at `path` and ensure the
    /// schema exists.
    pub fn open(path: &Path) -> Result<Self, RepoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA journal_mode = WAL;",
        )?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.migrate()?;
        Ok(repo)
    }

    /// Open an in-memory database, for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, RepoError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let repo = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        repo.migrate()?;
        Ok(repo)
    }

    fn migrate(&self) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                access_key TEXT NOT NULL UNIQUE,
                secret_key TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS buckets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                owner_id INTEGER NOT NULL REFERENCES users(id),
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS objects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                bucket_id INTEGER NOT NULL REFERENCES buckets(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                size INTEGER NOT NULL,
                etag TEXT NOT NULL,
                filepath TEXT NOT NULL,
                content_type TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                UNIQUE(bucket_id, name)
            );
            CREATE INDEX IF NOT EXISTS idx_objects_bucket_name ON objects(bucket_id, name);

            CREATE TABLE IF NOT EXISTS multipart_uploads (
                id TEXT PRIMARY KEY,
                bucket_name TEXT NOT NULL,
                object_name TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS multipart_parts (
                upload_id TEXT NOT NULL REFERENCES multipart_uploads(id) ON DELETE CASCADE,
                part_number INTEGER NOT NULL,
                etag TEXT NOT NULL,
                filepath TEXT NOT NULL,
                size INTEGER NOT NULL,
                PRIMARY KEY (upload_id, part_number)
            );",
        )?;
        Ok(())
    }

    // ---- users ----

    pub fn get_user_by_access_key(&self, access_key: &str) -> Result<Option<User>, RepoError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, access_key, secret_key FROM users WHERE access_key = ?1",
            params![access_key],
            |row| {
                Ok(User {
                    id: row.get(0)?,
                    access_key: row.get(1)?,
                    secret_key: row.get(2)?,
                })
            },
        )
        .optional()
        .map_err(RepoError::from)
    }

    /// Insert the seed user if it does not already exist (idempotent,
    /// called at bootstrap).
    pub fn insert_user_if_absent(&self, access_key: &str, secret_key: &str) -> Result<i64, RepoError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO users (access_key, secret_key) VALUES (?1, ?2)
             ON CONFLICT(access_key) DO UPDATE SET secret_key = excluded.secret_key",
            params![access_key, secret_key],
        )?;
        conn.query_row(
            "SELECT id FROM users WHERE access_key = ?1",
            params![access_key],
            |row| row.get(0),
        )
        .map_err(RepoError::from)
    }

    // ---- buckets ----

    pub fn get_bucket_by_name(&self, name: &str) -> Result<Option<Bucket>, RepoError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, owner_id, created_at FROM buckets WHERE name = ?1",
            params![name],
            row_to_bucket,
        )
        .optional()
        .map_err(RepoError::from)
    }

    pub fn create_bucket(&self, name: &str, owner_id: i64) -> Result<Bucket, RepoError> {
        let conn = self.conn.lock();
        let now = Utc::now();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM buckets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(RepoError::BucketAlreadyExists);
        }
        conn.execute(
            "INSERT INTO buckets (name, owner_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, owner_id, now.to_rfc3339()],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Bucket {
            id,
            name: name.to_string(),
            owner_id,
            created_at: now,
        })
    }

    /// True if the bucket has at least one object (§9: `BucketNotEmpty`
    /// check needs only existence, not a count).
    pub fn bucket_has_objects(&self, bucket_id: i64) -> Result<bool, RepoError> {
        let conn = self.conn.lock();
        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM objects WHERE bucket_id = ?1 LIMIT 1",
                params![bucket_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(exists.is_some())
    }

    pub fn delete_bucket(&self, bucket_id: i64) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM buckets WHERE id = ?1", params![bucket_id])?;
        Ok(())
    }

    // ---- objects ----

    pub fn get_object(&self, bucket_id: i64, name: &str) -> Result<Option<Object>, RepoError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, bucket_id, name, size, etag, filepath, content_type, last_modified
             FROM objects WHERE bucket_id = ?1 AND name = ?2",
            params![bucket_id, name],
            row_to_object,
        )
        .optional()
        .map_err(RepoError::from)
    }

    /// Insert or overwrite an object row (last committed write wins).
    pub fn put_object(
        &self,
        bucket_id: i64,
        name: &str,
        size: i64,
        etag: &str,
        filepath: &str,
        content_type: &str,
    ) -> Result<Object, RepoError> {
        let conn = self.conn.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO objects (bucket_id, name, size, etag, filepath, content_type, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(bucket_id, name) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                filepath = excluded.filepath,
                content_type = excluded.content_type,
                last_modified = excluded.last_modified",
            params![bucket_id, name, size, etag, filepath, content_type, now.to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT id, bucket_id, name, size, etag, filepath, content_type, last_modified
             FROM objects WHERE bucket_id = ?1 AND name = ?2",
            params![bucket_id, name],
            row_to_object,
        )
        .map_err(RepoError::from)
    }

    pub fn delete_object(&self, bucket_id: i64, name: &str) -> Result<Option<Object>, RepoError> {
        let conn = self.conn.lock();
        let obj = conn
            .query_row(
                "SELECT id, bucket_id, name, size, etag, filepath, content_type, last_modified
                 FROM objects WHERE bucket_id = ?1 AND name = ?2",
                params![bucket_id, name],
                row_to_object,
            )
            .optional()?;
        conn.execute(
            "DELETE FROM objects WHERE bucket_id = ?1 AND name = ?2",
            params![bucket_id, name],
        )?;
        Ok(obj)
    }

    /// List objects in a bucket, filtered by prefix and paginated by an
    /// exclusive `marker` on object name, ordered lexicographically.
    pub fn list_objects(
        &self,
        bucket_id: i64,
        prefix: &str,
        marker: &str,
        limit: i64,
    ) -> Result<ListObjectsPage, RepoError> {
        let conn = self.conn.lock();
        let like_pattern = format!("{}%", escape_like(prefix));
        let mut stmt = conn.prepare(
            "SELECT id, bucket_id, name, size, etag, filepath, content_type, last_modified
             FROM objects
             WHERE bucket_id = ?1
               AND (?2 = '' OR name LIKE ?3 ESCAPE '\\')
               AND (?4 = '' OR name > ?4)
             ORDER BY name ASC
             LIMIT ?5",
        )?;
        let rows = stmt.query_map(
            params![bucket_id, prefix, like_pattern, marker, limit + 1],
            row_to_object,
        )?;
        let mut objects = Vec::new();
        for row in rows {
            objects.push(row?);
        }

        let is_truncated = objects.len() as i64 > limit;
        let next_marker = if is_truncated {
            objects.truncate(limit as usize);
            objects.last().map(|o| o.name.clone())
        } else {
            None
        };

        Ok(ListObjectsPage {
            objects,
            is_truncated,
            next_marker,
        })
    }

    /// Every `Object.filepath` currently referenced, across all buckets.
    /// Used by the startup orphan sweep (§5, §9) to tell apart committed
    /// object files from stray ones a crash left behind.
    pub fn all_object_filepaths(&self) -> Result<std::collections::HashSet<String>, RepoError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT filepath FROM objects")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut paths = std::collections::HashSet::new();
        for row in rows {
            paths.insert(row?);
        }
        Ok(paths)
    }

    /// Every multipart upload id with a row in the metadata store. Used
    /// by the startup orphan sweep to tell apart in-flight `.tmp/<id>`
    /// directories from stray ones left by a crash between Initiate and
    /// Complete/Abort.
    pub fn all_multipart_upload_ids(&self) -> Result<std::collections::HashSet<String>, RepoError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT id FROM multipart_uploads")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = std::collections::HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    // ---- multipart uploads ----

    pub fn create_multipart_upload(
        &self,
        upload_id: &str,
        bucket_name: &str,
        object_name: &str,
    ) -> Result<MultipartUpload, RepoError> {
        let conn = self.conn.lock();
        let now = Utc::now();
        conn.execute(
            "INSERT INTO multipart_uploads (id, bucket_name, object_name, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![upload_id, bucket_name, object_name, now.to_rfc3339()],
        )?;
        Ok(MultipartUpload {
            id: upload_id.to_string(),
            bucket_name: bucket_name.to_string(),
            object_name: object_name.to_string(),
            created_at: now,
        })
    }

    pub fn get_multipart_upload(&self, upload_id: &str) -> Result<Option<MultipartUpload>, RepoError> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, bucket_name, object_name, created_at
             FROM multipart_uploads WHERE id = ?1",
            params![upload_id],
            row_to_upload,
        )
        .optional()
        .map_err(RepoError::from)
    }

    pub fn delete_multipart_upload(&self, upload_id: &str) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM multipart_uploads WHERE id = ?1",
            params![upload_id],
        )?;
        Ok(())
    }

    pub fn upsert_multipart_part(
        &self,
        upload_id: &str,
        part_number: i64,
        etag: &str,
        filepath: &str,
        size: i64,
    ) -> Result<(), RepoError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO multipart_parts (upload_id, part_number, etag, filepath, size)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(upload_id, part_number) DO UPDATE SET
                etag = excluded.etag,
                filepath = excluded.filepath,
                size = excluded.size",
            params![upload_id, part_number, etag, filepath, size],
        )?;
        Ok(())
    }

    pub fn list_multipart_parts(&self, upload_id: &str) -> Result<Vec<MultipartPart>, RepoError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT upload_id, part_number, etag, filepath, size
             FROM multipart_parts WHERE upload_id = ?1 ORDER BY part_number ASC",
        )?;
        let rows = stmt.query_map(params![upload_id], row_to_part)?;
        let mut parts = Vec::new();
        for row in rows {
            parts.push(row?);
        }
        Ok(parts)
    }

    /// Insert the completed object and drop the upload (and its parts,
    /// via the `ON DELETE CASCADE` foreign key) in a single transaction.
    /// Holding the connection mutex across both statements is what gives
    /// concurrent `CompleteMultipartUpload` calls on the same upload id
    /// their serialization: the second caller's `get_multipart_upload`
    /// check, once it acquires the lock, will already see the row gone.
    pub fn complete_multipart_upload_transaction(
        &self,
        upload_id: &str,
        bucket_id: i64,
        name: &str,
        size: i64,
        etag: &str,
        filepath: &str,
        content_type: &str,
    ) -> Result<Object, RepoError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        tx.execute(
            "INSERT INTO objects (bucket_id, name, size, etag, filepath, content_type, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(bucket_id, name) DO UPDATE SET
                size = excluded.size,
                etag = excluded.etag,
                filepath = excluded.filepath,
                content_type = excluded.content_type,
                last_modified = excluded.last_modified",
            params![bucket_id, name, size, etag, filepath, content_type, now.to_rfc3339()],
        )?;
        let object = tx.query_row(
            "SELECT id, bucket_id, name, size, etag, filepath, content_type, last_modified
             FROM objects WHERE bucket_id = ?1 AND name = ?2",
            params![bucket_id, name],
            row_to_object,
        )?;
        tx.execute(
            "DELETE FROM multipart_uploads WHERE id = ?1",
            params![upload_id],
        )?;
        tx.commit()?;
        Ok(object)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn row_to_bucket(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bucket> {
    let created_at: String = row.get(3)?;
    Ok(Bucket {
        id: row.get(0)?,
        name: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: parse_rfc3339(&created_at),
    })
}

fn row_to_object(row: &rusqlite::Row<'_>) -> rusqlite::Result<Object> {
    let last_modified: String = row.get(7)?;
    Ok(Object {
        id: row.get(0)?,
        bucket_id: row.get(1)?,
        name: row.get(2)?,
        size: row.get(3)?,
        etag: row.get(4)?,
        filepath: row.get(5)?,
        content_type: row.get(6)?,
        last_modified: parse_rfc3339(&last_modified),
    })
}

fn row_to_upload(row: &rusqlite::Row<'_>) -> rusqlite::Result<MultipartUpload> {
    let created_at: String = row.get(3)?;
    Ok(MultipartUpload {
        id: row.get(0)?,
        bucket_name: row.get(1)?,
        object_name: row.get(2)?,
        created_at: parse_rfc3339(&created_at),
    })
}

fn row_to_part(row: &rusqlite::Row<'_>) -> rusqlite::Result<MultipartPart> {
    Ok(MultipartPart {
        upload_id: row.get(0)?,
        part_number: row.get(1)?,
        etag: row.get(2)?,
        filepath: row.get(3)?,
        size: row.get(4)?,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
