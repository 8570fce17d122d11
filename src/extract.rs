use std::io::{Read, Seek};
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Context as _;
use epub::doc::EpubDoc;
use regex::Regex;

use crate::model::Chapter;
use crate::store::{BookLocks, BookStore};

/// Deadline for a single chapter extraction; a hung container read must not
/// block the request indefinitely.
pub const EXTRACT_TIMEOUT: Duration = Duration::from_secs(30);

static RE_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Loads the chapter, extracting its text from the durable container copy on
/// first access and caching the result (and the resolved manifest id) back
/// into the persisted structure. `Ok(None)` when the book or chapter id is
/// unknown; extraction failures are errors.
pub async fn get_chapter(
    store: &dyn BookStore,
    locks: &BookLocks,
    book_id: &str,
    chapter_id: &str,
) -> anyhow::Result<Option<Chapter>> {
    let lock = locks.for_book(book_id);
    let _guard = lock.lock().await;

    let Some(mut structure) = store.read(book_id).await.context("load structure")? else {
        return Ok(None);
    };

    let Some(chapter) = find_chapter(&structure.chapters, chapter_id) else {
        return Ok(None);
    };

    if chapter.is_extracted() {
        return Ok(Some(chapter.clone()));
    }

    let epub_path = store.epub_path(book_id);
    if !epub_path.exists() {
        anyhow::bail!("EPUB file not found: {}", epub_path.display());
    }

    let target = chapter.clone();
    let (manifest_id, text) = tokio::time::timeout(
        EXTRACT_TIMEOUT,
        tokio::task::spawn_blocking(move || {
            let mut doc = EpubDoc::new(&epub_path)
                .with_context(|| format!("open epub: {}", epub_path.display()))?;
            extract_node_text(&mut doc, &target)
        }),
    )
    .await
    .context("chapter extraction timed out")?
    .context("join extraction task")??;

    let node = find_chapter_mut(&mut structure.chapters, chapter_id)
        .context("chapter vanished from structure during extraction")?;
    node.manifest_id = Some(manifest_id);
    node.content = Some(text);
    let extracted = node.clone();

    store.write(book_id, &structure).await.context("persist extracted content")?;

    tracing::debug!(book_id, chapter_id, "extracted chapter content");
    Ok(Some(extracted))
}

/// Depth-first search over the chapter forest.
pub fn find_chapter<'a>(chapters: &'a [Chapter], chapter_id: &str) -> Option<&'a Chapter> {
    for chapter in chapters {
        if chapter.id == chapter_id {
            return Some(chapter);
        }
        if let Some(found) = find_chapter(&chapter.children, chapter_id) {
            return Some(found);
        }
    }
    None
}

pub fn find_chapter_mut<'a>(
    chapters: &'a mut [Chapter],
    chapter_id: &str,
) -> Option<&'a mut Chapter> {
    for chapter in chapters {
        if chapter.id == chapter_id {
            return Some(chapter);
        }
        if let Some(found) = find_chapter_mut(&mut chapter.children, chapter_id) {
            return Some(found);
        }
    }
    None
}

/// Resolves the manifest id for a chapter and returns it with the cleaned
/// text. The cached id on the node is authoritative when present; otherwise
/// the manifest is scanned for an entry matching the chapter's href.
pub(crate) fn extract_node_text<R: Read + Seek>(
    doc: &mut EpubDoc<R>,
    chapter: &Chapter,
) -> anyhow::Result<(String, String)> {
    let manifest_id = match &chapter.manifest_id {
        Some(id) => id.clone(),
        None => resolve_manifest_id(doc, &chapter.href)
            .ok_or_else(|| anyhow::anyhow!("no manifest entry found for {}", chapter.href))?,
    };

    let (markup, _mime) = doc
        .get_resource_str(&manifest_id)
        .ok_or_else(|| {
            anyhow::anyhow!("failed to extract content from {} ({manifest_id})", chapter.href)
        })?;

    let text = clean_html(&markup);
    if text.is_empty() {
        anyhow::bail!("no content found in {}", chapter.href);
    }

    Ok((manifest_id, text))
}

fn resolve_manifest_id<R: Read + Seek>(doc: &EpubDoc<R>, href: &str) -> Option<String> {
    let wanted = crate::ingest::strip_fragment(href);
    doc.resources.iter().find_map(|(id, (path, _mime))| {
        let candidate = path.to_string_lossy().replace('\\', "/");
        (candidate == wanted).then(|| id.clone())
    })
}

/// Strips markup, decodes the common HTML entities, collapses runs of
/// whitespace to single spaces, and trims.
pub fn clean_html(html: &str) -> String {
    let text = RE_TAG.replace_all(html, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    RE_WHITESPACE.replace_all(&text, " ").trim().to_owned()
}
