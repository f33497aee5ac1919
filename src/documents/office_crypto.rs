//! Office "agile" encryption (MS-OFFCRYPTO 2.3.4.10 – 2.3.4.15).
//!
//! An encrypted OOXML file is an OLE compound file holding two streams:
//! `EncryptionInfo` (version 4.4 header + XML descriptor) and
//! `EncryptedPackage` (u64 plaintext size + AES-CBC ciphertext in 4096-byte
//! segments). The password unlocks an intermediate key via a spun hash; the
//! intermediate key decrypts the package.
//!
//! Standard (binary descriptor) and extensible encryption are not supported.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockCipher, BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use quick_xml::Reader;
use quick_xml::events::Event;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha384, Sha512};
use tracing::{debug, warn};

use super::DocumentError;

const CFB_MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ENCRYPTION_INFO: &str = "/EncryptionInfo";
const ENCRYPTED_PACKAGE: &str = "/EncryptedPackage";

const SEGMENT_LEN: usize = 4096;
const DEFAULT_SPIN_COUNT: u32 = 100_000;
/// Upper bound MS-OFFCRYPTO places on `spinCount`.
const MAX_SPIN_COUNT: u32 = 10_000_000;
const AES_BLOCK_LEN: usize = 16;
const SALT_LEN: std::ops::RangeInclusive<usize> = 16..=64;

const BLOCK_KEY_VERIFIER_INPUT: [u8; 8] = [0xfe, 0xa7, 0xd2, 0x76, 0x3b, 0x4b, 0x9e, 0x79];
const BLOCK_KEY_VERIFIER_VALUE: [u8; 8] = [0xd7, 0xaa, 0x0f, 0x6d, 0x30, 0x61, 0x34, 0x4e];
const BLOCK_KEY_KEY_VALUE: [u8; 8] = [0x14, 0x6e, 0x0b, 0xe7, 0xab, 0xac, 0xd0, 0xd6];
const BLOCK_KEY_INTEGRITY_KEY: [u8; 8] = [0x5f, 0xb2, 0xad, 0x01, 0x0c, 0xb9, 0xe1, 0xf6];
const BLOCK_KEY_INTEGRITY_VALUE: [u8; 8] = [0xa0, 0x67, 0x7f, 0x02, 0xb2, 0x2c, 0x84, 0x33];

// ── Primitives ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashAlg {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    fn parse(name: &str) -> Result<Self, DocumentError> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA256" => Ok(HashAlg::Sha256),
            "SHA384" => Ok(HashAlg::Sha384),
            "SHA512" => Ok(HashAlg::Sha512),
            other => Err(DocumentError::UnsupportedEncryption(format!("hash algorithm {other}"))),
        }
    }

    fn name(self) -> &'static str {
        match self {
            HashAlg::Sha256 => "SHA256",
            HashAlg::Sha384 => "SHA384",
            HashAlg::Sha512 => "SHA512",
        }
    }

    fn size(self) -> usize {
        match self {
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }

    fn digest(self, parts: &[&[u8]]) -> Vec<u8> {
        fn run<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
            let mut hasher = D::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        }
        match self {
            HashAlg::Sha256 => run::<Sha256>(parts),
            HashAlg::Sha384 => run::<Sha384>(parts),
            HashAlg::Sha512 => run::<Sha512>(parts),
        }
    }

    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, DocumentError> {
        let bad_key = |e: hmac::digest::InvalidLength| DocumentError::Extraction(format!("hmac key rejected: {e}"));
        Ok(match self {
            HashAlg::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlg::Sha384 => {
                let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            HashAlg::Sha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key).map_err(bad_key)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }
}

/// Truncate or right-pad with `0x36` (MS-OFFCRYPTO 2.3.4.12 / 2.3.4.11).
fn fit(mut bytes: Vec<u8>, len: usize) -> Vec<u8> {
    bytes.resize(len, 0x36);
    bytes
}

fn pad_to_block(mut bytes: Vec<u8>, block: usize) -> Vec<u8> {
    let rem = bytes.len() % block;
    if rem != 0 {
        bytes.resize(bytes.len() + block - rem, 0);
    }
    bytes
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

fn cbc_run<C>(key: &[u8], iv: &[u8], data: &[u8], dir: Direction) -> Result<Vec<u8>, DocumentError>
where
    C: BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit,
{
    let bad = |what: &str| DocumentError::Extraction(format!("AES-CBC {what}"));
    let mut buf = data.to_vec();
    let len = buf.len();
    match dir {
        Direction::Encrypt => {
            cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(|_| bad("key/iv length invalid"))?
                .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                .map_err(|_| bad("input is not block aligned"))?;
        }
        Direction::Decrypt => {
            cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(|_| bad("key/iv length invalid"))?
                .decrypt_padded_mut::<NoPadding>(&mut buf)
                .map_err(|_| bad("ciphertext is not block aligned"))?;
        }
    }
    Ok(buf)
}

fn aes_cbc(key: &[u8], iv: &[u8], data: &[u8], dir: Direction) -> Result<Vec<u8>, DocumentError> {
    match key.len() {
        16 => cbc_run::<aes::Aes128>(key, iv, data, dir),
        24 => cbc_run::<aes::Aes192>(key, iv, data, dir),
        32 => cbc_run::<aes::Aes256>(key, iv, data, dir),
        n => Err(DocumentError::UnsupportedEncryption(format!("AES key of {n} bytes"))),
    }
}

// ── Descriptor ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct CipherParams {
    salt: Vec<u8>,
    block_size: usize,
    key_bytes: usize,
    hash: HashAlg,
}

#[derive(Debug, Clone)]
struct PasswordEncryptor {
    params: CipherParams,
    spin_count: u32,
    encrypted_verifier_input: Vec<u8>,
    encrypted_verifier_value: Vec<u8>,
    encrypted_key_value: Vec<u8>,
}

#[derive(Debug, Clone)]
struct AgileDescriptor {
    key_data: CipherParams,
    integrity: Option<(Vec<u8>, Vec<u8>)>,
    password: PasswordEncryptor,
}

fn attr<'a>(attrs: &'a HashMap<String, String>, name: &str) -> Result<&'a str, DocumentError> {
    attrs
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| DocumentError::Extraction(format!("encryption descriptor lacks {name}")))
}

fn attr_b64(attrs: &HashMap<String, String>, name: &str) -> Result<Vec<u8>, DocumentError> {
    STANDARD
        .decode(attr(attrs, name)?)
        .map_err(|e| DocumentError::Extraction(format!("{name} is not base64: {e}")))
}

/// Numeric attribute that must take one of `allowed` values. Anything else,
/// unparsable numbers included, is a descriptor we do not handle.
fn attr_in<T>(attrs: &HashMap<String, String>, name: &str, allowed: &[T]) -> Result<T, DocumentError>
where
    T: std::str::FromStr + PartialEq + Copy,
{
    let raw = attr(attrs, name)?;
    raw.parse()
        .ok()
        .filter(|v| allowed.contains(v))
        .ok_or_else(|| DocumentError::UnsupportedEncryption(format!("{name}={raw}")))
}

impl CipherParams {
    fn from_attrs(attrs: &HashMap<String, String>) -> Result<Self, DocumentError> {
        let cipher = attr(attrs, "cipherAlgorithm")?;
        if cipher != "AES" {
            return Err(DocumentError::UnsupportedEncryption(format!("cipher {cipher}")));
        }
        let chaining = attr(attrs, "cipherChaining")?;
        if chaining != "ChainingModeCBC" {
            return Err(DocumentError::UnsupportedEncryption(format!("chaining {chaining}")));
        }
        let block_size = attr_in(attrs, "blockSize", &[AES_BLOCK_LEN])?;
        let key_bits: usize = attr_in(attrs, "keyBits", &[128, 192, 256])?;
        let hash = HashAlg::parse(attr(attrs, "hashAlgorithm")?)?;
        attr_in(attrs, "hashSize", &[hash.size()])?;
        let salt = attr_b64(attrs, "saltValue")?;
        if !SALT_LEN.contains(&salt.len()) {
            return Err(DocumentError::UnsupportedEncryption(format!("salt of {} bytes", salt.len())));
        }
        Ok(Self {
            salt,
            block_size,
            key_bytes: key_bits / 8,
            hash,
        })
    }
}

fn spin_count(attrs: &HashMap<String, String>) -> Result<u32, DocumentError> {
    let raw = attr(attrs, "spinCount")?;
    raw.parse()
        .ok()
        .filter(|&n| n <= MAX_SPIN_COUNT)
        .ok_or_else(|| DocumentError::UnsupportedEncryption(format!("spinCount={raw}")))
}

fn parse_descriptor(xml: &str) -> Result<AgileDescriptor, DocumentError> {
    let mut reader = Reader::from_str(xml);
    let mut key_data = None;
    let mut integrity = None;
    let mut password = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| DocumentError::Extraction(format!("malformed encryption descriptor: {e}")))?;
        let element = match event {
            Event::Start(e) | Event::Empty(e) => e,
            Event::Eof => break,
            _ => continue,
        };

        let mut attrs = HashMap::new();
        for a in element.attributes() {
            let a = a.map_err(|e| DocumentError::Extraction(format!("bad descriptor attribute: {e}")))?;
            let value = a
                .unescape_value()
                .map_err(|e| DocumentError::Extraction(format!("bad descriptor attribute: {e}")))?;
            attrs.insert(String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(), value.into_owned());
        }

        match element.local_name().as_ref() {
            b"keyData" => key_data = Some(CipherParams::from_attrs(&attrs)?),
            b"dataIntegrity" => {
                integrity = Some((attr_b64(&attrs, "encryptedHmacKey")?, attr_b64(&attrs, "encryptedHmacValue")?));
            }
            b"encryptedKey" if attrs.contains_key("spinCount") => {
                password = Some(PasswordEncryptor {
                    params: CipherParams::from_attrs(&attrs)?,
                    spin_count: spin_count(&attrs)?,
                    encrypted_verifier_input: attr_b64(&attrs, "encryptedVerifierHashInput")?,
                    encrypted_verifier_value: attr_b64(&attrs, "encryptedVerifierHashValue")?,
                    encrypted_key_value: attr_b64(&attrs, "encryptedKeyValue")?,
                });
            }
            _ => {}
        }
    }

    Ok(AgileDescriptor {
        key_data: key_data.ok_or_else(|| DocumentError::Extraction("descriptor has no keyData".into()))?,
        integrity,
        password: password
            .ok_or_else(|| DocumentError::UnsupportedEncryption("no password key encryptor".into()))?,
    })
}

// ── Key derivation ────────────────────────────────────────────────────────────

fn spun_password_hash(hash: HashAlg, salt: &[u8], password: &str, spin_count: u32) -> Vec<u8> {
    let pw: Vec<u8> = password.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let mut h = hash.digest(&[salt, &pw[..]]);
    for i in 0..spin_count {
        h = hash.digest(&[&i.to_le_bytes()[..], &h[..]]);
    }
    h
}

fn block_key(params: &CipherParams, spun: &[u8], block_key: &[u8]) -> Vec<u8> {
    fit(params.hash.digest(&[spun, block_key]), params.key_bytes)
}

fn derived_iv(params: &CipherParams, block_key: &[u8]) -> Vec<u8> {
    fit(params.hash.digest(&[&params.salt[..], block_key]), params.block_size)
}

/// Verify the password and recover the intermediate (package) key.
fn unlock_key(enc: &PasswordEncryptor, password: &str) -> Result<Vec<u8>, DocumentError> {
    let p = &enc.params;
    let spun = spun_password_hash(p.hash, &p.salt, password, enc.spin_count);
    let iv = fit(p.salt.clone(), p.block_size);

    let verifier_input = aes_cbc(
        &block_key(p, &spun, &BLOCK_KEY_VERIFIER_INPUT),
        &iv,
        &enc.encrypted_verifier_input,
        Direction::Decrypt,
    )?;
    let verifier_value = aes_cbc(
        &block_key(p, &spun, &BLOCK_KEY_VERIFIER_VALUE),
        &iv,
        &enc.encrypted_verifier_value,
        Direction::Decrypt,
    )?;
    let salt_len = p.salt.len().min(verifier_input.len());
    let expected = p.hash.digest(&[&verifier_input[..salt_len]]);
    if verifier_value.len() < expected.len() || verifier_value[..expected.len()] != expected[..] {
        return Err(DocumentError::InvalidPassword);
    }

    let key = aes_cbc(
        &block_key(p, &spun, &BLOCK_KEY_KEY_VALUE),
        &iv,
        &enc.encrypted_key_value,
        Direction::Decrypt,
    )?;
    if key.len() < p.key_bytes {
        return Err(DocumentError::Extraction("encrypted key value too short".into()));
    }
    Ok(key[..p.key_bytes].to_vec())
}

fn segment_iv(params: &CipherParams, index: u32) -> Vec<u8> {
    fit(params.hash.digest(&[&params.salt[..], &index.to_le_bytes()[..]]), params.block_size)
}

// ── Container ────────────────────────────────────────────────────────────────

fn read_stream(comp: &mut cfb::CompoundFile<Cursor<&[u8]>>, path: &str) -> Result<Vec<u8>, DocumentError> {
    let mut stream = comp
        .open_stream(path)
        .map_err(|e| DocumentError::Extraction(format!("cannot open {path}: {e}")))?;
    let mut out = Vec::new();
    stream
        .read_to_end(&mut out)
        .map_err(|e| DocumentError::Extraction(format!("cannot read {path}: {e}")))?;
    Ok(out)
}

/// Whether `bytes` is an OLE compound file carrying an `EncryptionInfo` stream.
pub fn is_encrypted_package(bytes: &[u8]) -> bool {
    if !bytes.starts_with(&CFB_MAGIC) {
        return false;
    }
    match cfb::CompoundFile::open(Cursor::new(bytes)) {
        Ok(comp) => comp.is_stream(ENCRYPTION_INFO),
        Err(e) => {
            debug!(error = %e, "office: compound file unreadable");
            false
        }
    }
}

/// Decrypt an agile-encrypted OOXML package, returning the plain ZIP bytes.
pub fn decrypt(bytes: &[u8], password: &str) -> Result<Vec<u8>, DocumentError> {
    let mut comp = cfb::CompoundFile::open(Cursor::new(bytes))
        .map_err(|e| DocumentError::Extraction(format!("not an OLE compound file: {e}")))?;
    let info = read_stream(&mut comp, ENCRYPTION_INFO)?;
    let package = read_stream(&mut comp, ENCRYPTED_PACKAGE)?;

    if info.len() < 8 {
        return Err(DocumentError::Extraction("EncryptionInfo too short".into()));
    }
    let major = u16::from_le_bytes([info[0], info[1]]);
    let minor = u16::from_le_bytes([info[2], info[3]]);
    if (major, minor) != (4, 4) {
        return Err(DocumentError::UnsupportedEncryption(format!(
            "EncryptionInfo version {major}.{minor} (only agile 4.4 is supported)"
        )));
    }
    let xml = String::from_utf8_lossy(&info[8..]);
    let descriptor = parse_descriptor(xml.trim_start_matches('\u{feff}'))?;

    let key = unlock_key(&descriptor.password, password)?;

    if package.len() < 8 {
        return Err(DocumentError::Extraction("EncryptedPackage too short".into()));
    }
    let mut size_bytes = [0u8; 8];
    size_bytes.copy_from_slice(&package[..8]);
    let size = usize::try_from(u64::from_le_bytes(size_bytes))
        .map_err(|_| DocumentError::Extraction("EncryptedPackage size overflows".into()))?;

    if let Some((enc_hmac_key, enc_hmac_value)) = &descriptor.integrity {
        verify_integrity(&descriptor.key_data, &key, &package, enc_hmac_key, enc_hmac_value);
    }

    let mut plain = Vec::with_capacity(package.len() - 8);
    for (index, segment) in package[8..].chunks(SEGMENT_LEN).enumerate() {
        let index = u32::try_from(index)
            .map_err(|_| DocumentError::Extraction("EncryptedPackage too large".into()))?;
        let iv = segment_iv(&descriptor.key_data, index);
        plain.extend(aes_cbc(&key, &iv, segment, Direction::Decrypt)?);
    }
    if plain.len() < size {
        return Err(DocumentError::Extraction("EncryptedPackage shorter than declared size".into()));
    }
    plain.truncate(size);
    Ok(plain)
}

/// Integrity mismatches are logged, not fatal: the password has already
/// been verified and the ZIP layer catches real corruption.
fn verify_integrity(key_data: &CipherParams, key: &[u8], package: &[u8], enc_key: &[u8], enc_value: &[u8]) {
    let check = || -> Result<bool, DocumentError> {
        let hash_len = key_data.hash.size();
        let hmac_key = aes_cbc(key, &derived_iv(key_data, &BLOCK_KEY_INTEGRITY_KEY), enc_key, Direction::Decrypt)?;
        let hmac_value = aes_cbc(key, &derived_iv(key_data, &BLOCK_KEY_INTEGRITY_VALUE), enc_value, Direction::Decrypt)?;
        if hmac_key.len() < hash_len || hmac_value.len() < hash_len {
            return Ok(false);
        }
        let actual = key_data.hash.hmac(&hmac_key[..hash_len], package)?;
        Ok(actual[..] == hmac_value[..hash_len])
    };
    match check() {
        Ok(true) => debug!("office: package integrity verified"),
        Ok(false) => warn!("office: package integrity check failed"),
        Err(e) => warn!(error = %e, "office: package integrity not checked"),
    }
}

// ── Encryption ────────────────────────────────────────────────────────────────

fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// Encrypt a plain OOXML package with AES-256 / SHA-512 agile encryption.
pub fn encrypt(plain: &[u8], password: &str) -> Result<Vec<u8>, DocumentError> {
    encrypt_with_spin_count(plain, password, DEFAULT_SPIN_COUNT)
}

pub fn encrypt_with_spin_count(plain: &[u8], password: &str, spin_count: u32) -> Result<Vec<u8>, DocumentError> {
    if password.is_empty() {
        return Err(DocumentError::Extraction("password must not be empty".into()));
    }
    let hash = HashAlg::Sha512;
    let key_data = CipherParams { salt: random_bytes(16), block_size: 16, key_bytes: 32, hash };
    let pw_params = CipherParams { salt: random_bytes(16), block_size: 16, key_bytes: 32, hash };

    // Package key and password verifier.
    let key = random_bytes(key_data.key_bytes);
    let verifier_input = random_bytes(pw_params.salt.len());
    let spun = spun_password_hash(hash, &pw_params.salt, password, spin_count);
    let iv = pw_params.salt.clone();
    let encrypted_verifier_input = aes_cbc(
        &block_key(&pw_params, &spun, &BLOCK_KEY_VERIFIER_INPUT),
        &iv,
        &pad_to_block(verifier_input.clone(), 16),
        Direction::Encrypt,
    )?;
    let encrypted_verifier_value = aes_cbc(
        &block_key(&pw_params, &spun, &BLOCK_KEY_VERIFIER_VALUE),
        &iv,
        &pad_to_block(hash.digest(&[&verifier_input[..]]), 16),
        Direction::Encrypt,
    )?;
    let encrypted_key_value = aes_cbc(
        &block_key(&pw_params, &spun, &BLOCK_KEY_KEY_VALUE),
        &iv,
        &pad_to_block(key.clone(), 16),
        Direction::Encrypt,
    )?;

    // Package.
    let mut package = (plain.len() as u64).to_le_bytes().to_vec();
    for (index, segment) in plain.chunks(SEGMENT_LEN).enumerate() {
        let index = u32::try_from(index)
            .map_err(|_| DocumentError::Extraction("package too large".into()))?;
        let segment = pad_to_block(segment.to_vec(), 16);
        package.extend(aes_cbc(&key, &segment_iv(&key_data, index), &segment, Direction::Encrypt)?);
    }

    // Data integrity.
    let hmac_key = random_bytes(hash.size());
    let hmac_value = hash.hmac(&hmac_key, &package)?;
    let encrypted_hmac_key = aes_cbc(
        &key,
        &derived_iv(&key_data, &BLOCK_KEY_INTEGRITY_KEY),
        &pad_to_block(hmac_key, 16),
        Direction::Encrypt,
    )?;
    let encrypted_hmac_value = aes_cbc(
        &key,
        &derived_iv(&key_data, &BLOCK_KEY_INTEGRITY_VALUE),
        &pad_to_block(hmac_value, 16),
        Direction::Encrypt,
    )?;

    let params_attrs = |p: &CipherParams| {
        format!(
            r#"saltSize="{}" blockSize="{}" keyBits="{}" hashSize="{}" cipherAlgorithm="AES" cipherChaining="ChainingModeCBC" hashAlgorithm="{}" saltValue="{}""#,
            p.salt.len(),
            p.block_size,
            p.key_bytes * 8,
            p.hash.size(),
            p.hash.name(),
            STANDARD.encode(&p.salt)
        )
    };
    let xml = format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
            "\r\n",
            r#"<encryption xmlns="http://schemas.microsoft.com/office/2006/encryption" "#,
            r#"xmlns:p="http://schemas.microsoft.com/office/2006/keyEncryptor/password">"#,
            r#"<keyData {key_data}/>"#,
            r#"<dataIntegrity encryptedHmacKey="{hmac_key}" encryptedHmacValue="{hmac_value}"/>"#,
            r#"<keyEncryptors><keyEncryptor uri="http://schemas.microsoft.com/office/2006/keyEncryptor/password">"#,
            r#"<p:encryptedKey spinCount="{spin}" {pw_params} "#,
            r#"encryptedVerifierHashInput="{evi}" encryptedVerifierHashValue="{evv}" encryptedKeyValue="{ekv}"/>"#,
            r#"</keyEncryptor></keyEncryptors></encryption>"#
        ),
        key_data = params_attrs(&key_data),
        hmac_key = STANDARD.encode(&encrypted_hmac_key),
        hmac_value = STANDARD.encode(&encrypted_hmac_value),
        spin = spin_count,
        pw_params = params_attrs(&pw_params),
        evi = STANDARD.encode(&encrypted_verifier_input),
        evv = STANDARD.encode(&encrypted_verifier_value),
        ekv = STANDARD.encode(&encrypted_key_value),
    );

    let mut info = Vec::with_capacity(8 + xml.len());
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&4u16.to_le_bytes());
    info.extend_from_slice(&0x40u32.to_le_bytes());
    info.extend_from_slice(xml.as_bytes());

    write_compound_file(&[(ENCRYPTION_INFO, &info), (ENCRYPTED_PACKAGE, &package)])
}

fn write_compound_file(streams: &[(&str, &[u8])]) -> Result<Vec<u8>, DocumentError> {
    let io_err = |e: std::io::Error| DocumentError::Extraction(format!("compound file write failed: {e}"));
    let mut comp = cfb::CompoundFile::create(Cursor::new(Vec::new())).map_err(io_err)?;
    for (path, data) in streams {
        let mut stream = comp.create_stream(path).map_err(io_err)?;
        stream.write_all(data).map_err(io_err)?;
        stream.flush().map_err(io_err)?;
    }
    comp.flush().map_err(io_err)?;
    Ok(comp.into_inner().into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIN: u32 = 1_000;

    fn sample_plain(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn fit_truncates_and_pads() {
        assert_eq!(fit(vec![1, 2, 3], 2), vec![1, 2]);
        assert_eq!(fit(vec![1], 3), vec![1, 0x36, 0x36]);
    }

    #[test]
    fn roundtrip_across_segment_boundaries() {
        let plain = sample_plain(SEGMENT_LEN * 2 + 123);
        let locked = encrypt_with_spin_count(&plain, "correct horse", SPIN).unwrap();
        assert!(locked.starts_with(&CFB_MAGIC));
        assert!(is_encrypted_package(&locked));
        assert_eq!(decrypt(&locked, "correct horse").unwrap(), plain);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let locked = encrypt_with_spin_count(&sample_plain(100), "right", SPIN).unwrap();
        assert!(matches!(decrypt(&locked, "wrong"), Err(DocumentError::InvalidPassword)));
    }

    #[test]
    fn unicode_password() {
        let plain = sample_plain(10);
        let locked = encrypt_with_spin_count(&plain, "pässwörd✓", SPIN).unwrap();
        assert_eq!(decrypt(&locked, "pässwörd✓").unwrap(), plain);
        assert!(decrypt(&locked, "passwort").is_err());
    }

    #[test]
    fn empty_password_refused_for_encryption() {
        assert!(encrypt_with_spin_count(b"x", "", SPIN).is_err());
    }

    #[test]
    fn non_cfb_input() {
        assert!(!is_encrypted_package(b"PK\x03\x04 zip bytes"));
        assert!(!is_encrypted_package(&CFB_MAGIC));
        assert!(decrypt(b"nope", "pw").is_err());
    }

    #[test]
    fn compound_file_without_encryption_info() {
        let comp = write_compound_file(&[("/WordDocument", b"legacy")]).unwrap();
        assert!(!is_encrypted_package(&comp));
    }

    #[test]
    fn standard_encryption_is_unsupported() {
        let mut info = Vec::new();
        info.extend_from_slice(&3u16.to_le_bytes());
        info.extend_from_slice(&2u16.to_le_bytes());
        info.extend_from_slice(&0u32.to_le_bytes());
        let comp = write_compound_file(&[(ENCRYPTION_INFO, &info), (ENCRYPTED_PACKAGE, &[0u8; 8])]).unwrap();
        assert!(is_encrypted_package(&comp));
        assert!(matches!(decrypt(&comp, "pw"), Err(DocumentError::UnsupportedEncryption(_))));
    }

    #[test]
    fn descriptor_parses_both_elements() {
        let locked = encrypt_with_spin_count(&sample_plain(1), "pw", 7).unwrap();
        let mut comp = cfb::CompoundFile::open(Cursor::new(locked.as_slice())).unwrap();
        let info = read_stream(&mut comp, ENCRYPTION_INFO).unwrap();
        let descriptor = parse_descriptor(std::str::from_utf8(&info[8..]).unwrap()).unwrap();
        assert_eq!(descriptor.password.spin_count, 7);
        assert_eq!(descriptor.key_data.hash, HashAlg::Sha512);
        assert_eq!(descriptor.key_data.key_bytes, 32);
        assert!(descriptor.integrity.is_some());
    }

    /// Rewrite every `name="..."` attribute in the descriptor XML.
    fn set_attr(xml: &str, name: &str, value: &str) -> String {
        let needle = format!(r#" {name}=""#);
        let mut out = String::with_capacity(xml.len());
        let mut rest = xml;
        while let Some(start) = rest.find(&needle) {
            let value_start = start + needle.len();
            let value_end = value_start + rest[value_start..].find('"').unwrap();
            out.push_str(&rest[..value_start]);
            out.push_str(value);
            rest = &rest[value_end..];
        }
        out.push_str(rest);
        out
    }

    /// Re-pack `locked` with its descriptor passed through `edit`.
    fn tampered(locked: &[u8], edit: impl Fn(&str) -> String) -> Vec<u8> {
        let mut comp = cfb::CompoundFile::open(Cursor::new(locked)).unwrap();
        let info = read_stream(&mut comp, ENCRYPTION_INFO).unwrap();
        let package = read_stream(&mut comp, ENCRYPTED_PACKAGE).unwrap();
        let xml = edit(std::str::from_utf8(&info[8..]).unwrap());
        let mut info_out = info[..8].to_vec();
        info_out.extend_from_slice(xml.as_bytes());
        write_compound_file(&[(ENCRYPTION_INFO, &info_out), (ENCRYPTED_PACKAGE, &package)]).unwrap()
    }

    fn assert_unsupported(bytes: &[u8]) {
        match decrypt(bytes, "any-guess") {
            Err(DocumentError::UnsupportedEncryption(_)) => {}
            other => panic!("expected unsupported encryption, got {other:?}"),
        }
    }

    #[test]
    fn untampered_descriptor_still_decrypts() {
        let plain = sample_plain(64);
        let locked = encrypt_with_spin_count(&plain, "pw", SPIN).unwrap();
        let same = tampered(&locked, str::to_owned);
        assert_eq!(decrypt(&same, "pw").unwrap(), plain);
    }

    #[test]
    fn oversized_block_size_is_refused_without_allocating() {
        let locked = encrypt_with_spin_count(&sample_plain(64), "pw", SPIN).unwrap();
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "blockSize", "18446744073709551615")));
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "blockSize", "32")));
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "blockSize", "-1")));
    }

    #[test]
    fn odd_key_bits_are_refused() {
        let locked = encrypt_with_spin_count(&sample_plain(64), "pw", SPIN).unwrap();
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "keyBits", "1024")));
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "keyBits", "99999999999999999999999")));
    }

    #[test]
    fn hash_size_must_match_algorithm() {
        let locked = encrypt_with_spin_count(&sample_plain(64), "pw", SPIN).unwrap();
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "hashSize", "20")));
    }

    #[test]
    fn salt_outside_allowed_length_is_refused() {
        let locked = encrypt_with_spin_count(&sample_plain(64), "pw", SPIN).unwrap();
        let short = STANDARD.encode([7u8; 4]);
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "saltValue", &short)));
        let long = STANDARD.encode([7u8; 65]);
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "saltValue", &long)));
    }

    #[test]
    fn excessive_spin_count_is_refused_before_hashing() {
        let locked = encrypt_with_spin_count(&sample_plain(64), "pw", SPIN).unwrap();
        let started = std::time::Instant::now();
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "spinCount", "4294967295")));
        assert_unsupported(&tampered(&locked, |xml| set_attr(xml, "spinCount", "10000001")));
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }

    #[test]
    fn maximum_spin_count_is_accepted_by_parser() {
        let locked = encrypt_with_spin_count(&sample_plain(1), "pw", SPIN).unwrap();
        let edited = tampered(&locked, |xml| set_attr(xml, "spinCount", "10000000"));
        let mut comp = cfb::CompoundFile::open(Cursor::new(edited.as_slice())).unwrap();
        let info = read_stream(&mut comp, ENCRYPTION_INFO).unwrap();
        let descriptor = parse_descriptor(std::str::from_utf8(&info[8..]).unwrap()).unwrap();
        assert_eq!(descriptor.password.spin_count, MAX_SPIN_COUNT);
    }

    #[test]
    fn descriptor_that_is_not_xml_is_an_error() {
        let locked = encrypt_with_spin_count(&sample_plain(1), "pw", SPIN).unwrap();
        let garbled = tampered(&locked, |_| "<encryption><keyData saltValue=".to_string());
        assert!(decrypt(&garbled, "pw").is_err());
    }
}
