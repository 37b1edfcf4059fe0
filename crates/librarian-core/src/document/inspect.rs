//! Direct, in-process PDF inspection with `lopdf`.
//!
//! These functions may hang or allocate heavily on hostile input; the
//! validator only calls them in-process when isolation is disabled.

use lopdf::{Dictionary, Document, Object};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

pub const HEADER_PROBE_BYTES: u64 = 1024;
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Facts about a structurally valid PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdfDetails {
    pub page_count: usize,
    pub has_text: bool,
    pub version: Option<String>,
    pub creator: Option<String>,
    pub producer: Option<String>,
}

/// AppleDouble resource forks carry a `.pdf` name but no PDF content.
pub fn is_resource_fork(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with("._"))
        .unwrap_or(false)
}

/// True when the file should go through validation: a `.pdf` extension or
/// a sniffed `%PDF-` header.
pub fn is_pdf_candidate(path: &Path) -> bool {
    if is_resource_fork(path) {
        return false;
    }
    let by_extension = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false);
    by_extension || matches!(read_header(path), Ok(Some(_)))
}

/// Read the header window and return the declared version when the file
/// starts with `%PDF-`.
pub fn read_header(path: &Path) -> io::Result<Option<String>> {
    let mut buf = Vec::with_capacity(HEADER_PROBE_BYTES as usize);
    File::open(path)?
        .take(HEADER_PROBE_BYTES)
        .read_to_end(&mut buf)?;
    if !buf.starts_with(PDF_MAGIC) {
        return Ok(None);
    }
    let version: String = buf[PDF_MAGIC.len()..]
        .iter()
        .take(3)
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|b| *b as char)
        .collect();
    Ok(Some(version))
}

/// Load the document and collect its details. A document that loads but has
/// no pages is not valid.
pub fn probe_pdf(path: &Path, max_text_pages: usize) -> Result<PdfDetails, String> {
    let doc = Document::load(path).map_err(|e| format!("failed to load PDF: {}", e))?;
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err("document has no pages".to_string());
    }

    let has_text = first_pages_text(&doc, max_text_pages)
        .map(|t| !t.trim().is_empty())
        .unwrap_or(false);
    let info = info_dictionary(&doc);

    Ok(PdfDetails {
        page_count: pages.len(),
        has_text,
        version: Some(doc.version.clone()).filter(|v| !v.is_empty()),
        creator: info.and_then(|d| text_entry(d, b"Creator")),
        producer: info.and_then(|d| text_entry(d, b"Producer")),
    })
}

/// Text of the first `max_pages` pages, for identifier scanning.
pub fn extract_text_sample(path: &Path, max_pages: usize) -> Result<String, String> {
    let doc = Document::load(path).map_err(|e| format!("failed to load PDF: {}", e))?;
    first_pages_text(&doc, max_pages).ok_or_else(|| "no extractable text".to_string())
}

fn first_pages_text(doc: &Document, max_pages: usize) -> Option<String> {
    let mut text = String::new();
    let mut page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
    page_numbers.sort_unstable();
    for page in page_numbers.into_iter().take(max_pages.max(1)) {
        if let Ok(page_text) = doc.extract_text(&[page]) {
            if !page_text.trim().is_empty() {
                text.push_str(&page_text);
                text.push('\n');
            }
        }
    }
    Some(text).filter(|t| !t.is_empty())
}

fn info_dictionary(doc: &Document) -> Option<&Dictionary> {
    match doc.trailer.get(b"Info").ok()? {
        Object::Reference(id) => doc.get_dictionary(*id).ok(),
        Object::Dictionary(dict) => Some(dict),
        _ => None,
    }
}

fn text_entry(dict: &Dictionary, key: &[u8]) -> Option<String> {
    match dict.get(key).ok()? {
        Object::String(bytes, _) => {
            let value = decode_pdf_string(bytes);
            Some(value).filter(|v| !v.trim().is_empty())
        }
        _ => None,
    }
}

fn decode_pdf_string(bytes: &[u8]) -> String {
    if let Some(utf16) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        let units: Vec<u16> = utf16
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        return String::from_utf16_lossy(&units);
    }
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::Path;

    /// Write a one-page PDF. With `text`, the page draws it in Courier.
    pub fn write_pdf(path: &Path, text: Option<&str>) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let operations = match text {
            Some(t) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 24.into()]),
                Operation::new("Td", vec![72.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(t)]),
                Operation::new("ET", vec![]),
            ],
            None => vec![],
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap_or_default(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let info_id = doc.add_object(dictionary! {
            "Creator" => Object::string_literal("Librarian Tests"),
            "Producer" => Object::string_literal("lopdf"),
        });
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.trailer.set("Info", info_id);
        doc.save(path).unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::write_pdf;
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_header_version_is_read() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("h.pdf");
        fs::write(&path, b"%PDF-1.7\n%binary\n").unwrap();
        assert_eq!(read_header(&path).unwrap(), Some("1.7".to_string()));

        let not_pdf = tmp.path().join("n.pdf");
        fs::write(&not_pdf, b"<html>not a pdf</html>").unwrap();
        assert_eq!(read_header(&not_pdf).unwrap(), None);
    }

    #[test]
    fn test_candidate_detection() {
        let tmp = tempdir().unwrap();
        let sniffed = tmp.path().join("download.bin");
        fs::write(&sniffed, b"%PDF-1.4 rest").unwrap();
        let fork = tmp.path().join("._Core.pdf");
        fs::write(&fork, b"%PDF-1.4 rest").unwrap();
        let text = tmp.path().join("notes.txt");
        fs::write(&text, b"plain notes").unwrap();

        assert!(is_pdf_candidate(&sniffed));
        assert!(is_pdf_candidate(Path::new("/missing/Upper.PDF")));
        assert!(!is_pdf_candidate(&fork));
        assert!(!is_pdf_candidate(&text));
    }

    #[test]
    fn test_probe_reports_text_and_metadata() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("rules.pdf");
        write_pdf(&path, Some("Dungeon Masters Guide"));

        let details = probe_pdf(&path, 10).unwrap();
        assert_eq!(details.page_count, 1);
        assert!(details.has_text);
        assert_eq!(details.version.as_deref(), Some("1.5"));
        assert_eq!(details.creator.as_deref(), Some("Librarian Tests"));
        assert_eq!(details.producer.as_deref(), Some("lopdf"));

        let sample = extract_text_sample(&path, 1).unwrap();
        assert!(sample.contains("Dungeon"));
    }

    #[test]
    fn test_probe_image_only_page_has_no_text() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("scan.pdf");
        write_pdf(&path, None);
        let details = probe_pdf(&path, 10).unwrap();
        assert!(!details.has_text);
    }

    #[test]
    fn test_probe_rejects_garbage_after_header() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\ngarbage garbage garbage").unwrap();
        assert!(probe_pdf(&path, 10).is_err());
    }
}
