//! PDF text layer via `lopdf`.

use lopdf::Document;
use lopdf::encryption::DecryptionError;
use tracing::debug;

use super::DocumentError;

fn decrypt_error(e: lopdf::Error) -> DocumentError {
    match e {
        lopdf::Error::Decryption(DecryptionError::IncorrectPassword) => DocumentError::InvalidPassword,
        lopdf::Error::Decryption(DecryptionError::UnsupportedEncryption) => {
            DocumentError::UnsupportedEncryption("PDF security handler".into())
        }
        other => DocumentError::Extraction(format!("PDF decryption failed: {other}")),
    }
}

fn load(bytes: &[u8]) -> Result<Document, DocumentError> {
    Document::load_mem(bytes).map_err(|e| match e {
        // Refused while loading: leave the handler to poppler.
        lopdf::Error::Decryption(d) => DocumentError::UnsupportedEncryption(format!("PDF security handler: {d}")),
        other => DocumentError::Extraction(format!("invalid PDF: {other}")),
    })
}

/// Load and, if needed, decrypt. The empty user password is tried first so
/// owner-password-only files open without asking.
fn open(bytes: &[u8], password: Option<&str>) -> Result<Document, DocumentError> {
    let mut doc = load(bytes)?;
    if !doc.is_encrypted() {
        return Ok(doc);
    }
    match doc.decrypt("").map_err(decrypt_error) {
        Ok(()) => return Ok(doc),
        Err(DocumentError::InvalidPassword) => {}
        Err(e) => return Err(e),
    }

    let password = password.ok_or(DocumentError::PasswordRequired)?;
    let mut doc = load(bytes)?;
    doc.decrypt(password).map_err(|e| {
        debug!(error = %e, "pdf: decryption with supplied password failed");
        decrypt_error(e)
    })?;
    Ok(doc)
}

/// Whether the file is encrypted and the empty password does not open it.
///
/// Security handlers lopdf cannot evaluate come back as
/// [`DocumentError::UnsupportedEncryption`]; unreadable files report `false`.
pub fn lock_state(bytes: &[u8]) -> Result<bool, DocumentError> {
    match open(bytes, None) {
        Ok(_) => Ok(false),
        Err(DocumentError::PasswordRequired) => Ok(true),
        Err(e @ DocumentError::UnsupportedEncryption(_)) => Err(e),
        Err(e) => {
            debug!(error = %e, "pdf: lock state unknown, treating as open");
            Ok(false)
        }
    }
}

/// Concatenated text of every page, trimmed. Pages whose text cannot be
/// decoded are skipped.
pub fn extract_text_layer(bytes: &[u8], password: Option<&str>) -> Result<String, DocumentError> {
    let doc = open(bytes, password)?;
    let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
    let mut parts = Vec::with_capacity(pages.len());
    for page in pages {
        match doc.extract_text(&[page]) {
            Ok(text) => parts.push(text),
            Err(e) => debug!(page, error = %e, "pdf: page text not extractable"),
        }
    }
    Ok(parts.join("\n").trim().to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, ObjectId, Stream, StringFormat, dictionary};
    use md5::{Digest, Md5};
    use rc4::consts::U16;
    use rc4::{KeyInit, Rc4, StreamCipher};

    /// Password padding string of the standard security handler.
    const PAD: [u8; 32] = [
        0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E,
        0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
    ];
    const FILE_ID: &[u8] = b"smartmail-test-file-id";
    const PERMISSIONS: i32 = -4;

    fn document_with_lines(lines: &[&str]) -> Document {
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

        let mut operations = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new("Td", vec![72.into(), (720 - 20 * i as i64).into()]));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    fn save(mut doc: Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    /// One-page PDF with each line drawn in Courier.
    pub(crate) fn pdf_with_lines(lines: &[&str]) -> Vec<u8> {
        save(document_with_lines(lines))
    }

    fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        Rc4::<U16>::new_from_slice(key).unwrap().apply_keystream(&mut out);
        out
    }

    /// RC4 with the key XOR-ed by 1..=19 after the first pass (revision 3).
    fn rc4_rounds(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut out = rc4(key, data);
        for i in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
            out = rc4(&round_key, &out);
        }
        out
    }

    fn padded(password: &str) -> Vec<u8> {
        let mut out: Vec<u8> = password.bytes().take(32).collect();
        out.extend_from_slice(&PAD[..32 - out.len()]);
        out
    }

    fn md5_rehash(mut digest: Vec<u8>) -> Vec<u8> {
        for _ in 0..50 {
            digest = Md5::digest(&digest[..16]).to_vec();
        }
        digest.truncate(16);
        digest
    }

    fn owner_entry(owner: &str, user: &str) -> Vec<u8> {
        let key = md5_rehash(Md5::digest(padded(owner)).to_vec());
        rc4_rounds(&key, &padded(user))
    }

    fn file_key(user: &str, owner_entry: &[u8]) -> Vec<u8> {
        let mut h = Md5::new();
        h.update(padded(user));
        h.update(owner_entry);
        h.update((PERMISSIONS as u32).to_le_bytes());
        h.update(FILE_ID);
        md5_rehash(h.finalize().to_vec())
    }

    fn user_entry(key: &[u8]) -> Vec<u8> {
        let mut h = Md5::new();
        h.update(PAD);
        h.update(FILE_ID);
        let mut out = rc4_rounds(key, &h.finalize());
        out.extend_from_slice(&PAD[..16]);
        out
    }

    fn object_key(key: &[u8], id: ObjectId) -> Vec<u8> {
        let mut h = Md5::new();
        h.update(key);
        h.update(&id.0.to_le_bytes()[..3]);
        h.update(&id.1.to_le_bytes()[..2]);
        h.finalize()[..16].to_vec()
    }

    fn hex(bytes: Vec<u8>) -> Object {
        Object::String(bytes, StringFormat::Hexadecimal)
    }

    /// `pdf_with_lines` under the standard security handler (RC4, 128-bit,
    /// revision 3). `version` goes into `/V`.
    fn encrypted_with_version(lines: &[&str], user: &str, owner: &str, version: i64) -> Vec<u8> {
        let mut doc = document_with_lines(lines);
        let o = owner_entry(owner, user);
        let key = file_key(user, &o);
        for (&id, obj) in doc.objects.iter_mut() {
            match obj {
                Object::Stream(stream) => {
                    let sealed = rc4(&object_key(&key, id), &stream.content);
                    stream.set_content(sealed);
                }
                Object::String(content, _) => *content = rc4(&object_key(&key, id), content),
                _ => {}
            }
        }
        let encrypt_id = doc.add_object(dictionary! {
            "Filter" => "Standard",
            "V" => version,
            "R" => 3,
            "Length" => 128,
            "P" => PERMISSIONS as i64,
            "O" => hex(o),
            "U" => hex(user_entry(&key)),
        });
        doc.trailer.set("Encrypt", encrypt_id);
        doc.trailer
            .set("ID", vec![hex(FILE_ID.to_vec()), hex(FILE_ID.to_vec())]);
        save(doc)
    }

    pub(crate) fn encrypted_pdf_with_lines(lines: &[&str], user: &str, owner: &str) -> Vec<u8> {
        encrypted_with_version(lines, user, owner, 2)
    }

    /// Encrypted with a `/V` value no reader implements.
    pub(crate) fn pdf_with_unknown_security_handler(lines: &[&str], user: &str) -> Vec<u8> {
        encrypted_with_version(lines, user, "owner-secret", 3)
    }

    #[test]
    fn extracts_all_lines() {
        let bytes = pdf_with_lines(&["Invoice 2041", "Amount due: 310 EUR"]);
        let text = extract_text_layer(&bytes, None).unwrap();
        assert!(text.contains("Invoice 2041"));
        assert!(text.contains("Amount due: 310 EUR"));
    }

    #[test]
    fn blank_page_yields_empty_text() {
        let bytes = pdf_with_lines(&[]);
        assert_eq!(extract_text_layer(&bytes, None).unwrap(), "");
    }

    #[test]
    fn plain_pdf_is_not_locked() {
        assert!(!lock_state(&pdf_with_lines(&["hello"])).unwrap());
    }

    #[test]
    fn password_is_ignored_for_unencrypted_files() {
        let bytes = pdf_with_lines(&["open document"]);
        assert!(extract_text_layer(&bytes, Some("unused")).unwrap().contains("open document"));
    }

    #[test]
    fn garbage_is_an_extraction_error() {
        let err = extract_text_layer(b"not a pdf", None).unwrap_err();
        assert!(matches!(err, DocumentError::Extraction(_)));
        assert!(!lock_state(b"not a pdf").unwrap());
    }

    #[test]
    fn user_password_locks_the_file() {
        let bytes = encrypted_pdf_with_lines(&["Payslip March"], "s3cret", "owner-secret");
        assert!(lock_state(&bytes).unwrap());
        let err = extract_text_layer(&bytes, None).unwrap_err();
        assert!(matches!(err, DocumentError::PasswordRequired));
    }

    #[test]
    fn wrong_password_is_reported_as_invalid() {
        let bytes = encrypted_pdf_with_lines(&["Payslip March"], "s3cret", "owner-secret");
        let err = extract_text_layer(&bytes, Some("guess")).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidPassword));
        assert_eq!(err.to_string(), "Invalid Password");
    }

    #[test]
    fn correct_password_reads_the_text() {
        let bytes = encrypted_pdf_with_lines(&["Payslip March", "Net pay 2150"], "s3cret", "owner-secret");
        let text = extract_text_layer(&bytes, Some("s3cret")).unwrap();
        assert!(text.contains("Payslip March"));
        assert!(text.contains("Net pay 2150"));
    }

    #[test]
    fn owner_password_only_opens_without_asking() {
        let bytes = encrypted_pdf_with_lines(&["Brochure"], "", "owner-secret");
        assert!(!lock_state(&bytes).unwrap());
        assert!(extract_text_layer(&bytes, None).unwrap().contains("Brochure"));
    }

    #[test]
    fn unknown_security_handler_is_not_a_password_error() {
        let bytes = pdf_with_unknown_security_handler(&["Statement"], "s3cret");
        assert!(matches!(lock_state(&bytes), Err(DocumentError::UnsupportedEncryption(_))));
        let err = extract_text_layer(&bytes, Some("s3cret")).unwrap_err();
        assert!(matches!(err, DocumentError::UnsupportedEncryption(_)), "{err:?}");
    }
}
