use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use epub::doc::{EpubDoc, NavPoint};

use crate::model::{BookMetadata, BookStructure, Chapter, ImageAsset};
use crate::store::BookStore;

/// Deadline for parsing a container and pulling its image bytes. A hung
/// parse must not block the request forever.
pub const PARSE_TIMEOUT: Duration = Duration::from_secs(30);

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// Builds the canonical structure record for a validated EPUB file: fresh
/// book id, metadata with fallback defaults, the chapter forest in pre-order
/// with a shared order counter, and every image asset copied into the book's
/// namespace. Persists a durable copy of the container (needed for lazy text
/// extraction later) and then the structure itself.
///
/// A failure to extract a single image is logged and skipped; a failure to
/// open or parse the container aborts the whole build.
pub async fn ingest_epub(
    store: &dyn BookStore,
    epub_path: &Path,
) -> anyhow::Result<BookStructure> {
    let book_id = uuid::Uuid::new_v4().to_string();

    let path = epub_path.to_path_buf();
    let parsed = tokio::time::timeout(
        PARSE_TIMEOUT,
        tokio::task::spawn_blocking(move || parse_document(&path)),
    )
    .await
    .context("epub parsing timed out")?
    .context("join epub parse task")??;

    let mut images = Vec::new();
    for raw in parsed.images {
        let file_name = format!("{}.{}", raw.id, image_extension(&raw.media_type));
        match store.store_image(&book_id, &file_name, &raw.bytes).await {
            Ok(local_path) => images.push(ImageAsset {
                id: raw.id,
                href: raw.href,
                media_type: raw.media_type,
                local_path: local_path.to_string_lossy().into_owned(),
            }),
            Err(err) => {
                tracing::warn!(book_id, image_id = %raw.id, ?err, "failed to store image; skipping");
            }
        }
    }

    store
        .store_epub(&book_id, epub_path)
        .await
        .context("store durable epub copy")?;

    let structure = BookStructure {
        id: book_id.clone(),
        title: parsed.title,
        author: parsed.author,
        metadata: parsed.metadata,
        chapters: parsed.chapters,
        images,
        uploaded_at: Utc::now(),
    };

    store
        .write(&book_id, &structure)
        .await
        .context("persist structure")?;

    tracing::info!(
        book_id,
        title = %structure.title,
        chapters = structure.chapters.len(),
        images = structure.images.len(),
        "ingested epub"
    );

    Ok(structure)
}

struct ParsedDocument {
    title: String,
    author: String,
    metadata: BookMetadata,
    chapters: Vec<Chapter>,
    images: Vec<RawImage>,
}

struct RawImage {
    id: String,
    href: String,
    media_type: String,
    bytes: Vec<u8>,
}

fn parse_document(path: &Path) -> anyhow::Result<ParsedDocument> {
    let mut doc =
        EpubDoc::new(path).with_context(|| format!("open epub: {}", path.display()))?;

    let title = meta(&doc, "title").unwrap_or_else(|| UNKNOWN_TITLE.to_owned());
    let author = meta(&doc, "creator").unwrap_or_else(|| UNKNOWN_AUTHOR.to_owned());

    let metadata = BookMetadata {
        title: title.clone(),
        creator: meta(&doc, "creator"),
        language: meta(&doc, "language"),
        identifier: meta(&doc, "identifier"),
        publisher: meta(&doc, "publisher"),
        date: meta(&doc, "date"),
        description: meta(&doc, "description"),
    };

    let toc = std::mem::take(&mut doc.toc);
    let mut order = 0u32;
    let chapters = toc
        .iter()
        .map(|nav| chapter_from_nav(nav, &mut order))
        .collect();

    let image_entries = doc
        .resources
        .iter()
        .filter(|(_, (_, mime))| mime.starts_with("image/"))
        .map(|(id, (res_path, mime))| {
            (
                id.clone(),
                res_path.to_string_lossy().replace('\\', "/"),
                mime.clone(),
            )
        })
        .collect::<Vec<_>>();

    let mut images = Vec::new();
    for (id, href, media_type) in image_entries {
        match doc.get_resource(&id) {
            Some((bytes, _mime)) => images.push(RawImage {
                id,
                href,
                media_type,
                bytes,
            }),
            None => {
                tracing::warn!(image_id = %id, href = %href, "failed to extract image; skipping");
            }
        }
    }

    Ok(ParsedDocument {
        title,
        author,
        metadata,
        chapters,
        images,
    })
}

/// First metadata entry for `name`, with blank values treated as missing.
fn meta<R: std::io::Read + std::io::Seek>(doc: &EpubDoc<R>, name: &str) -> Option<String> {
    doc.mdata(name).filter(|v| !v.trim().is_empty())
}

/// Pre-order: the node takes the next order value before its children. The
/// counter is shared across the whole forest and never reset per level.
fn chapter_from_nav(nav: &NavPoint, order: &mut u32) -> Chapter {
    let ord = *order;
    *order += 1;

    let label = nav.label.trim();
    let title = if label.is_empty() {
        format!("Chapter {}", ord + 1)
    } else {
        label.to_owned()
    };

    let href = strip_fragment(&nav.content.to_string_lossy().replace('\\', "/")).to_owned();

    let children = nav
        .children
        .iter()
        .map(|child| chapter_from_nav(child, order))
        .collect();

    Chapter {
        id: uuid::Uuid::new_v4().to_string(),
        title,
        content: None,
        order: ord,
        href,
        manifest_id: None,
        children,
    }
}

/// Maps an image media type to the on-disk extension; unrecognized types
/// fall back to jpg.
pub fn image_extension(media_type: &str) -> &'static str {
    match media_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/svg+xml" => "svg",
        "image/webp" => "webp",
        _ => "jpg",
    }
}

/// TOC entries may point into a document fragment (`ch1.xhtml#s2`); the
/// manifest only knows the path part.
pub(crate) fn strip_fragment(href: &str) -> &str {
    href.split('#').next().unwrap_or(href)
}
