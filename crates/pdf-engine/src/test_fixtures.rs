//! PDF fixtures for tests.
//!
//! Builds small, well-formed documents with `lopdf` instead of shipping
//! binary fixtures. Enabled for this crate's own tests and, via the
//! `test-fixtures` feature, for downstream crates' dev builds.

use lopdf::content::Content;
use lopdf::{dictionary, Document, Object, Stream};
use std::io::Write;
use tempfile::NamedTempFile;

/// Serialized PDF with one page per `(width_pt, height_pt)` entry.
pub fn pdf_bytes(pages: &[(f32, f32)]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for &(width, height) in pages {
        let content = Content { operations: vec![] };
        let content_id =
            doc.add_object(Stream::new(dictionary! {}, content.encode().expect("encode content")));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
        });
        kids.push(page_id.into());
    }

    let count = pages.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("serialize fixture pdf");
    bytes
}

fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(bytes).expect("write fixture");
    file.flush().expect("flush fixture");
    file
}

/// One-page document on disk.
pub fn single_page_pdf(width_pt: f32, height_pt: f32) -> NamedTempFile {
    write_temp(&pdf_bytes(&[(width_pt, height_pt)]))
}

/// Multi-page document on disk.
pub fn multi_page_pdf(pages: &[(f32, f32)]) -> NamedTempFile {
    write_temp(&pdf_bytes(pages))
}

/// A file that is not a PDF at all.
pub fn garbage_file() -> NamedTempFile {
    write_temp(b"this is not a pdf")
}
