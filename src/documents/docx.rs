//! DOCX text: body paragraphs, then a flattened rendering of tables.

use std::io::{Cursor, Read};

use quick_xml::Reader;
use quick_xml::events::Event;

use super::{DocumentError, office_crypto};

const DOCUMENT_PART: &str = "word/document.xml";

/// Text of a DOCX file, decrypting it first when it is an encrypted package.
pub fn extract_text(bytes: &[u8], password: Option<&str>) -> Result<String, DocumentError> {
    if office_crypto::is_encrypted_package(bytes) {
        let password = password.ok_or(DocumentError::PasswordRequired)?;
        let plain = office_crypto::decrypt(bytes, password)?;
        return read_package(&plain);
    }
    read_package(bytes)
}

fn read_package(bytes: &[u8]) -> Result<String, DocumentError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| DocumentError::Extraction(format!("invalid DOCX archive: {e}")))?;
    let mut part = archive
        .by_name(DOCUMENT_PART)
        .map_err(|e| DocumentError::Extraction(format!("DOCX has no {DOCUMENT_PART}: {e}")))?;
    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|e| DocumentError::Extraction(format!("cannot read {DOCUMENT_PART}: {e}")))?;
    let body = parse_document_xml(&xml)?;
    Ok(body.render())
}

#[derive(Debug, Default, PartialEq)]
struct DocumentBody {
    paragraphs: Vec<String>,
    /// table → rows → cell texts
    tables: Vec<Vec<Vec<String>>>,
}

impl DocumentBody {
    fn render(&self) -> String {
        let mut parts: Vec<String> = self.paragraphs.clone();
        if !self.tables.is_empty() {
            parts.push("\n\n--- Tables Found ---\n".to_string());
            for table in &self.tables {
                for row in table {
                    parts.push(row.join(" | "));
                }
                parts.push("--- End of Table ---\n".to_string());
            }
        }
        parts.join("\n")
    }
}

/// Walks `word/document.xml`.
///
/// Only top-level tables are flattened; nested tables and text boxes are
/// skipped, as are paragraphs nested inside another paragraph.
fn parse_document_xml(xml: &str) -> Result<DocumentBody, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut body = DocumentBody::default();

    let mut table_depth = 0usize;
    let mut para_depth = 0usize;
    let mut para = String::new();
    let mut cell_paras: Vec<String> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut table: Vec<Vec<String>> = Vec::new();
    let mut in_text = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocumentError::Extraction(format!("malformed document.xml: {e}")))?;
        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"w:tbl" => table_depth += 1,
                b"w:tr" if table_depth == 1 => row.clear(),
                b"w:tc" if table_depth == 1 => cell_paras.clear(),
                b"w:p" => {
                    para_depth += 1;
                    if para_depth == 1 {
                        para.clear();
                    }
                }
                b"w:t" => in_text = true,
                _ => {}
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"w:p" if para_depth == 0 => match table_depth {
                    0 => body.paragraphs.push(String::new()),
                    1 => cell_paras.push(String::new()),
                    _ => {}
                },
                b"w:tab" if para_depth == 1 && table_depth <= 1 => para.push('\t'),
                b"w:br" | b"w:cr" if para_depth == 1 && table_depth <= 1 => para.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_text && para_depth == 1 && table_depth <= 1 => {
                let text = t
                    .unescape()
                    .map_err(|e| DocumentError::Extraction(format!("bad text node: {e}")))?;
                para.push_str(&text);
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    if para_depth == 1 {
                        match table_depth {
                            0 => body.paragraphs.push(std::mem::take(&mut para)),
                            1 => cell_paras.push(std::mem::take(&mut para)),
                            _ => para.clear(),
                        }
                    }
                    para_depth = para_depth.saturating_sub(1);
                }
                b"w:tc" if table_depth == 1 => row.push(cell_paras.join("\n")),
                b"w:tr" if table_depth == 1 => table.push(std::mem::take(&mut row)),
                b"w:tbl" => {
                    if table_depth == 1 {
                        body.tables.push(std::mem::take(&mut table));
                    }
                    table_depth = table_depth.saturating_sub(1);
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(body)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    const NS: &str = r#"xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main""#;

    /// Minimal DOCX whose body is `body_xml`.
    pub(crate) fn docx_with_body(body_xml: &str) -> Vec<u8> {
        let document = format!(r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><w:document {NS}><w:body>{body_xml}</w:body></w:document>"#);
        let mut out = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut out);
            let options = SimpleFileOptions::default();
            zip.start_file("[Content_Types].xml", options).unwrap();
            zip.write_all(br#"<?xml version="1.0"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"/>"#)
                .unwrap();
            zip.start_file(DOCUMENT_PART, options).unwrap();
            zip.write_all(document.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        out.into_inner()
    }

    fn p(text: &str) -> String {
        format!("<w:p><w:r><w:t>{text}</w:t></w:r></w:p>")
    }

    fn cell(text: &str) -> String {
        format!("<w:tc>{}</w:tc>", p(text))
    }

    #[test]
    fn paragraphs_joined_by_newline() {
        let bytes = docx_with_body(&format!("{}{}<w:p/>{}", p("First"), p("Second &amp; more"), p("Last")));
        assert_eq!(extract_text(&bytes, None).unwrap(), "First\nSecond & more\n\nLast");
    }

    #[test]
    fn runs_tabs_and_breaks_inside_a_paragraph() {
        let bytes = docx_with_body(
            r#"<w:p><w:r><w:t xml:space="preserve">Dear </w:t></w:r><w:r><w:t>team</w:t><w:tab/><w:t>x</w:t><w:br/><w:t>y</w:t></w:r></w:p>"#,
        );
        assert_eq!(extract_text(&bytes, None).unwrap(), "Dear team\tx\ny");
    }

    #[test]
    fn tables_are_flattened_after_paragraphs() {
        let table = format!(
            "<w:tbl><w:tr>{}{}</w:tr><w:tr>{}{}</w:tr></w:tbl>",
            cell("Item"),
            cell("Cost"),
            cell("Laptop"),
            cell("900")
        );
        let bytes = docx_with_body(&format!("{}{}{}", p("Budget"), table, p("Thanks")));
        let text = extract_text(&bytes, None).unwrap();
        assert_eq!(
            text,
            "Budget\nThanks\n\n\n--- Tables Found ---\n\nItem | Cost\nLaptop | 900\n--- End of Table ---\n"
        );
    }

    #[test]
    fn nested_tables_are_skipped() {
        let inner = format!("<w:tbl><w:tr>{}</w:tr></w:tbl>", cell("inner"));
        let outer = format!("<w:tbl><w:tr><w:tc>{}{}</w:tc>{}</w:tr></w:tbl>", p("outer"), inner, cell("b"));
        let body = parse_document_xml(&format!(
            r#"<w:document {NS}><w:body>{outer}</w:body></w:document>"#
        ))
        .unwrap();
        assert_eq!(body.tables, vec![vec![vec!["outer".to_string(), "b".to_string()]]]);
        assert!(body.paragraphs.is_empty());
    }

    #[test]
    fn not_a_zip_is_an_extraction_error() {
        let err = extract_text(b"plain text", None).unwrap_err();
        assert!(matches!(err, DocumentError::Extraction(_)));
    }
}
