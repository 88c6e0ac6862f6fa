use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use scraper::Html;
use tracing::info;
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::error::ExportError;
use super::markup::{Serializer, fragment_root};
use super::types::SavedArticle;

/// Site chrome removed before an article is packaged or shown in reader mode.
pub const BOILERPLATE_SELECTORS: &str =
    ".mw-editsection, .reflist, #toc, .navbox, .metadata, .catlinks";

const BOOK_CREATOR: &str = "Grokipedia";

const STYLESHEET: &str = "body { font-family: serif; line-height: 1.5; }
h1, h2, h3 { font-family: sans-serif; }
img { max-width: 100%; height: auto; }
.infobox, .thumb { border: 1px solid #ccc; background-color: #f9f9f9; padding: 1em; margin: 1em 0; font-size: 0.9em; }
";

const CONTAINER_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>
"#;

pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

pub fn book_file_name(title: &str) -> String {
    format!("{}.epub", sanitize_filename(title))
}

/// Article markup with boilerplate removed, serialized as XHTML.
pub fn clean_article_xhtml(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    Serializer::new()
        .skip_matching(BOILERPLATE_SELECTORS)
        .xhtml()
        .inner(fragment_root(&fragment))
}

/// Packages a saved article as a single-chapter EPUB 3 book.
pub fn export_as_book(article: &SavedArticle) -> Result<Vec<u8>, ExportError> {
    let title = html_escape::encode_text(article.query.trim()).to_string();
    let identifier = Uuid::new_v4();
    let modified = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let deflated = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("mimetype", stored)?;
    zip.write_all(b"application/epub+zip")?;

    let entries = [
        ("META-INF/container.xml", CONTAINER_XML.to_string()),
        ("OEBPS/content.opf", package_document(&title, identifier, &modified)),
        ("OEBPS/toc.ncx", ncx_document(&title, identifier)),
        ("OEBPS/nav.xhtml", nav_document(&title)),
        ("OEBPS/style.css", STYLESHEET.to_string()),
        (
            "OEBPS/content.xhtml",
            content_document(&title, &clean_article_xhtml(&article.content)),
        ),
    ];
    for (name, body) in entries {
        zip.start_file(name, deflated)?;
        zip.write_all(body.as_bytes())?;
    }

    Ok(zip.finish()?.into_inner())
}

/// Writes the book for `article` into `dir` and returns its path.
pub fn write_book(article: &SavedArticle, dir: &Path) -> Result<PathBuf, ExportError> {
    let bytes = export_as_book(article)?;
    fs::create_dir_all(dir)?;
    let path = dir.join(book_file_name(&article.query));
    fs::write(&path, &bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "book exported");
    Ok(path)
}

fn package_document(title: &str, identifier: Uuid, modified: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="pub-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="pub-id">urn:uuid:{identifier}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{BOOK_CREATOR}</dc:creator>
    <dc:language>en</dc:language>
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="content" href="content.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="style.css" media-type="text/css"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
  </manifest>
  <spine toc="ncx">
    <itemref idref="content"/>
  </spine>
</package>
"#
    )
}

fn ncx_document(title: &str, identifier: Uuid) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="urn:uuid:{identifier}"/>
    <meta name="dtb:depth" content="1"/>
    <meta name="dtb:totalPageCount" content="0"/>
    <meta name="dtb:maxPageNumber" content="0"/>
  </head>
  <docTitle><text>{title}</text></docTitle>
  <navMap>
    <navPoint id="navpoint-1" playOrder="1">
      <navLabel><text>{title}</text></navLabel>
      <content src="content.xhtml"/>
    </navPoint>
  </navMap>
</ncx>
"#
    )
}

fn nav_document(title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head><title>{title}</title></head>
<body>
  <nav epub:type="toc" id="toc">
    <ol><li><a href="content.xhtml">{title}</a></li></ol>
  </nav>
</body>
</html>
"#
    )
}

fn content_document(title: &str, body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <title>{title}</title>
  <link rel="stylesheet" type="text/css" href="style.css"/>
</head>
<body>
  <h1>{title}</h1>
  {body}
</body>
</html>
"#
    )
}
