use std::io::{Read, Seek};

use anyhow::Context as _;
use epub::doc::EpubDoc;

use crate::extract::{EXTRACT_TIMEOUT, extract_node_text, find_chapter, find_chapter_mut};
use crate::model::Chapter;
use crate::store::{BookLocks, BookStore};

/// Loads the chapter with its whole subtree flattened into `content`: the
/// node's own text followed by every descendant's text in pre-order, joined
/// by newlines. Missing chapter text anywhere in the subtree is extracted
/// first, with the container opened once for the whole operation, and the
/// structure persisted once afterwards. The aggregate string exists only in
/// the returned value; each node keeps its own per-node content.
pub async fn get_full_chapter(
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

    let Some(target) = find_chapter(&structure.chapters, chapter_id) else {
        return Ok(None);
    };

    if !subtree_all_extracted(target) {
        let epub_path = store.epub_path(book_id);
        if !epub_path.exists() {
            anyhow::bail!("EPUB file not found: {}", epub_path.display());
        }

        let id = chapter_id.to_owned();
        structure = tokio::time::timeout(
            EXTRACT_TIMEOUT,
            tokio::task::spawn_blocking(move || {
                let mut doc = EpubDoc::new(&epub_path)
                    .with_context(|| format!("open epub: {}", epub_path.display()))?;
                let node = find_chapter_mut(&mut structure.chapters, &id)
                    .context("chapter vanished from structure during extraction")?;
                fill_subtree(&mut doc, node)?;
                anyhow::Ok(structure)
            }),
        )
        .await
        .context("subtree extraction timed out")?
        .context("join extraction task")??;

        store
            .write(book_id, &structure)
            .await
            .context("persist extracted subtree")?;

        tracing::debug!(book_id, chapter_id, "extracted chapter subtree");
    }

    let node = find_chapter(&structure.chapters, chapter_id)
        .context("chapter vanished from structure during extraction")?;
    let mut full = node.clone();
    full.content = Some(aggregate_text(node));
    Ok(Some(full))
}

fn subtree_all_extracted(chapter: &Chapter) -> bool {
    chapter.is_extracted() && chapter.children.iter().all(subtree_all_extracted)
}

fn fill_subtree<R: Read + Seek>(doc: &mut EpubDoc<R>, node: &mut Chapter) -> anyhow::Result<()> {
    if !node.is_extracted() {
        let (manifest_id, text) = extract_node_text(doc, node)?;
        node.manifest_id = Some(manifest_id);
        node.content = Some(text);
    }
    for child in &mut node.children {
        fill_subtree(doc, child)?;
    }
    Ok(())
}

/// Pre-order concatenation of the node's own content and its descendants',
/// newline-joined, each segment trimmed, the whole result trimmed.
pub fn aggregate_text(chapter: &Chapter) -> String {
    let mut parts = Vec::new();
    collect_text(chapter, &mut parts);
    parts.join("\n").trim().to_owned()
}

fn collect_text(chapter: &Chapter, parts: &mut Vec<String>) {
    if let Some(content) = &chapter.content {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_owned());
        }
    }
    for child in &chapter.children {
        collect_text(child, parts);
    }
}
