#![allow(dead_code)]

use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use zip::write::SimpleFileOptions;

/// One TOC entry in a fixture container; nested entries become nested
/// navPoints in the NCX navigation document.
pub struct FixtureChapter {
    pub id: &'static str,
    pub href: &'static str,
    pub title: &'static str,
    pub body: &'static str,
    pub children: Vec<FixtureChapter>,
}

impl FixtureChapter {
    pub fn leaf(id: &'static str, href: &'static str, title: &'static str, body: &'static str) -> Self {
        Self {
            id,
            href,
            title,
            body,
            children: Vec::new(),
        }
    }
}

pub struct FixtureImage {
    pub id: &'static str,
    pub href: &'static str,
    pub media_type: &'static str,
    /// `None` simulates a manifest entry whose payload is missing from the
    /// archive, which must not abort ingestion.
    pub bytes: Option<Vec<u8>>,
}

pub struct EpubFixture {
    pub title: Option<&'static str>,
    pub author: Option<&'static str>,
    pub chapters: Vec<FixtureChapter>,
    pub images: Vec<FixtureImage>,
}

/// 1x1 transparent PNG.
pub const TINY_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1,
    128, 110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

impl EpubFixture {
    /// Three nested chapters (A → B → C), one untitled sibling, a PNG, an
    /// SVG, and one broken image entry.
    pub fn standard() -> Self {
        Self {
            title: Some("The Fixture Book"),
            author: Some("Fixture Author"),
            chapters: vec![
                FixtureChapter {
                    id: "ch1",
                    href: "ch1.xhtml",
                    title: "Intro",
                    body: "<h1>Intro</h1><p>A</p>",
                    children: vec![FixtureChapter {
                        id: "ch2",
                        href: "ch2.xhtml",
                        title: "Detail",
                        body: "<p>B</p>",
                        children: vec![FixtureChapter::leaf(
                            "ch3",
                            "ch3.xhtml",
                            "Fine print",
                            "<p>C</p>",
                        )],
                    }],
                },
                FixtureChapter::leaf(
                    "ch4",
                    "ch4.xhtml",
                    "",
                    "<p>Fish &amp; chips&nbsp;&lt;now&gt;</p>",
                ),
            ],
            images: vec![
                FixtureImage {
                    id: "img-cover",
                    href: "images/cover.png",
                    media_type: "image/png",
                    bytes: Some(TINY_PNG.to_vec()),
                },
                FixtureImage {
                    id: "img-diagram",
                    href: "images/diagram.svg",
                    media_type: "image/svg+xml",
                    bytes: Some(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>".to_vec()),
                },
                FixtureImage {
                    id: "img-missing",
                    href: "images/missing.jpg",
                    media_type: "image/jpeg",
                    bytes: None,
                },
            ],
        }
    }

    pub fn write_to(&self, path: &Path) {
        let out = File::create(path).expect("create fixture epub");
        let mut zip = zip::ZipWriter::new(out);

        // EPUB containers require `mimetype` as the first entry, stored
        // uncompressed.
        let stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("mimetype", stored).expect("start mimetype");
        zip.write_all(b"application/epub+zip").expect("write mimetype");

        let deflated = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        zip.start_file("META-INF/container.xml", deflated)
            .expect("start container.xml");
        zip.write_all(CONTAINER_XML.as_bytes())
            .expect("write container.xml");

        zip.start_file("OEBPS/content.opf", deflated)
            .expect("start content.opf");
        zip.write_all(self.render_opf().as_bytes())
            .expect("write content.opf");

        zip.start_file("OEBPS/toc.ncx", deflated).expect("start toc.ncx");
        zip.write_all(self.render_ncx().as_bytes())
            .expect("write toc.ncx");

        for chapter in flatten(&self.chapters) {
            zip.start_file(format!("OEBPS/{}", chapter.href), deflated)
                .expect("start chapter file");
            // No <title> text: cleanup keeps all character data, so the body
            // alone defines the expected extracted text.
            let xhtml = format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
                 <html xmlns=\"http://www.w3.org/1999/xhtml\">\
                 <head/><body>{}</body></html>",
                chapter.body,
            );
            zip.write_all(xhtml.as_bytes()).expect("write chapter file");
        }

        for image in &self.images {
            if let Some(bytes) = &image.bytes {
                zip.start_file(format!("OEBPS/{}", image.href), deflated)
                    .expect("start image file");
                zip.write_all(bytes).expect("write image file");
            }
        }

        zip.finish().expect("finish fixture epub");
    }

    fn render_opf(&self) -> String {
        let mut metadata = String::new();
        metadata.push_str(
            "    <dc:identifier id=\"bookid\">urn:uuid:fixture-book</dc:identifier>\n",
        );
        if let Some(title) = self.title {
            metadata.push_str(&format!("    <dc:title>{}</dc:title>\n", escape_xml(title)));
        }
        if let Some(author) = self.author {
            metadata.push_str(&format!(
                "    <dc:creator>{}</dc:creator>\n",
                escape_xml(author)
            ));
        }
        metadata.push_str("    <dc:language>en</dc:language>\n");

        let mut items = String::new();
        items.push_str(
            "    <item id=\"ncx\" href=\"toc.ncx\" media-type=\"application/x-dtbncx+xml\"/>\n",
        );
        let mut spine = String::new();
        for chapter in flatten(&self.chapters) {
            items.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
                chapter.id, chapter.href,
            ));
            spine.push_str(&format!("    <itemref idref=\"{}\"/>\n", chapter.id));
        }
        for image in &self.images {
            items.push_str(&format!(
                "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>\n",
                image.id, image.href, image.media_type,
            ));
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <package xmlns=\"http://www.idpf.org/2007/opf\" unique-identifier=\"bookid\" version=\"2.0\">\n\
             \x20\x20<metadata xmlns:dc=\"http://purl.org/dc/elements/1.1/\">\n{metadata}\x20\x20</metadata>\n\
             \x20\x20<manifest>\n{items}\x20\x20</manifest>\n\
             \x20\x20<spine toc=\"ncx\">\n{spine}\x20\x20</spine>\n\
             </package>\n"
        )
    }

    fn render_ncx(&self) -> String {
        let mut nav_map = String::new();
        let mut play_order = 0usize;
        for chapter in &self.chapters {
            render_nav_point(chapter, &mut nav_map, &mut play_order);
        }

        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\">\n\
             \x20\x20<head><meta name=\"dtb:uid\" content=\"urn:uuid:fixture-book\"/></head>\n\
             \x20\x20<docTitle><text>{}</text></docTitle>\n\
             \x20\x20<navMap>\n{nav_map}\x20\x20</navMap>\n\
             </ncx>\n",
            escape_xml(self.title.unwrap_or("Untitled")),
        )
    }
}

fn render_nav_point(chapter: &FixtureChapter, out: &mut String, play_order: &mut usize) {
    *play_order += 1;
    out.push_str(&format!(
        "    <navPoint id=\"nav-{}\" playOrder=\"{}\">\
         <navLabel><text>{}</text></navLabel>\
         <content src=\"{}\"/>\n",
        chapter.id,
        play_order,
        escape_xml(chapter.title),
        chapter.href,
    ));
    for child in &chapter.children {
        render_nav_point(child, out, play_order);
    }
    out.push_str("    </navPoint>\n");
}

fn flatten<'a>(chapters: &'a [FixtureChapter]) -> Vec<&'a FixtureChapter> {
    let mut out = Vec::new();
    for chapter in chapters {
        out.push(chapter);
        out.extend(flatten(&chapter.children));
    }
    out
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

const CONTAINER_XML: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n\
\x20\x20<rootfiles>\n\
\x20\x20\x20\x20<rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n\
\x20\x20</rootfiles>\n\
</container>\n";
