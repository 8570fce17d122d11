use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;

use crate::model::{BookStructure, BookSummary};

pub const STRUCTURE_FILE: &str = "structure.json";
pub const EPUB_FILE: &str = "book.epub";

/// Durable persistence for book structures, keyed by book id. Each book gets
/// its own directory namespace holding the structure record, a copy of the
/// original container, and the extracted image files.
#[async_trait]
pub trait BookStore: Send + Sync {
    /// `Ok(None)` when no record exists; errors are reserved for real I/O or
    /// parse failures on an existing record.
    async fn read(&self, book_id: &str) -> anyhow::Result<Option<BookStructure>>;

    /// Whole-record replace.
    async fn write(&self, book_id: &str, structure: &BookStructure) -> anyhow::Result<()>;

    /// Removes the book's entire namespace. Returns `false` if it was absent.
    async fn delete(&self, book_id: &str) -> anyhow::Result<bool>;

    /// All readable books, newest first. Unreadable records are logged and
    /// skipped so one corrupt book cannot fail the listing.
    async fn list(&self) -> anyhow::Result<Vec<BookSummary>>;

    /// Copies the original container into the book's namespace.
    async fn store_epub(&self, book_id: &str, src: &Path) -> anyhow::Result<PathBuf>;

    /// Writes one extracted image asset into the book's namespace.
    async fn store_image(
        &self,
        book_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<PathBuf>;

    /// Where the durable container copy lives (it may not exist yet).
    fn epub_path(&self, book_id: &str) -> PathBuf;
}

#[derive(Debug, Clone)]
pub struct LocalFsBookStore {
    base_dir: PathBuf,
}

impl LocalFsBookStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn books_dir(&self) -> PathBuf {
        self.base_dir.join("books")
    }

    pub fn book_dir(&self, book_id: &str) -> PathBuf {
        self.books_dir().join(book_id)
    }

    fn structure_path(&self, book_id: &str) -> PathBuf {
        self.book_dir(book_id).join(STRUCTURE_FILE)
    }
}

#[async_trait]
impl BookStore for LocalFsBookStore {
    async fn read(&self, book_id: &str) -> anyhow::Result<Option<BookStructure>> {
        let path = self.structure_path(book_id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    async fn write(&self, book_id: &str, structure: &BookStructure) -> anyhow::Result<()> {
        write_json_atomic(&self.structure_path(book_id), structure)
            .await
            .context("write structure.json")
    }

    async fn delete(&self, book_id: &str) -> anyhow::Result<bool> {
        let dir = self.book_dir(book_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => {
                Err(err).with_context(|| format!("remove book namespace: {}", dir.display()))
            }
        }
    }

    async fn list(&self) -> anyhow::Result<Vec<BookSummary>> {
        let books_dir = self.books_dir();
        let mut dir = match fs::read_dir(&books_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err).with_context(|| format!("read dir: {}", books_dir.display()));
            }
        };

        let mut books = Vec::new();
        while let Some(entry) = dir.next_entry().await.context("read books dir entry")? {
            if !entry.file_type().await.is_ok_and(|ty| ty.is_dir()) {
                continue;
            }
            let book_id = entry.file_name().to_string_lossy().to_string();
            match self.read(&book_id).await {
                Ok(Some(structure)) => books.push(BookSummary::from_structure(&structure)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(book_id, ?err, "skipping unreadable book record");
                }
            }
        }

        books.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        Ok(books)
    }

    async fn store_epub(&self, book_id: &str, src: &Path) -> anyhow::Result<PathBuf> {
        let dest = self.epub_path(book_id);
        fs::create_dir_all(self.book_dir(book_id))
            .await
            .with_context(|| format!("create book dir: {}", self.book_dir(book_id).display()))?;
        fs::copy(src, &dest)
            .await
            .with_context(|| format!("copy epub to: {}", dest.display()))?;
        Ok(dest)
    }

    async fn store_image(
        &self,
        book_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> anyhow::Result<PathBuf> {
        let path = self.book_dir(book_id).join(file_name);
        fs::create_dir_all(self.book_dir(book_id))
            .await
            .with_context(|| format!("create book dir: {}", self.book_dir(book_id).display()))?;
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("write image: {}", path.display()))?;
        Ok(path)
    }

    fn epub_path(&self, book_id: &str) -> PathBuf {
        self.book_dir(book_id).join(EPUB_FILE)
    }
}

/// In-process mutual exclusion for read-modify-write cycles on one book's
/// structure record. The store itself is last-write-wins at whole-record
/// granularity, so every mutating operation must hold the book's lock.
#[derive(Debug, Default)]
pub struct BookLocks {
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl BookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_book(&self, book_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(book_id.to_owned())
            .or_default()
            .clone()
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let value = serde_json::from_slice(&bytes).context("parse json")?;
    Ok(Some(value))
}

pub(crate) async fn write_json_atomic<T: serde::Serialize>(
    path: &Path,
    value: &T,
) -> anyhow::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("create parent dir: {}", parent.display()))?;

    let tmp_path = path.with_extension(format!("tmp.{}", uuid::Uuid::new_v4().simple()));
    let data = serde_json::to_vec_pretty(value).context("serialize json")?;
    fs::write(&tmp_path, &data)
        .await
        .with_context(|| format!("write tmp: {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("rename tmp to final: {}", path.display()))?;
    Ok(())
}
