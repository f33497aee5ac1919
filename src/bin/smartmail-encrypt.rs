//! `smartmail-encrypt`: write a password-protected copy of a DOCX file.
//!
//! The output uses ECMA-376 agile encryption (AES-256 / SHA-512), the format
//! Word produces, so it exercises the locked-document path of the service.
//!
//! ```text
//! smartmail-encrypt <input.docx> <output.docx> [--password <PW>]
//! ```
//!
//! Without `--password` the password is read from the first line of stdin.

use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use smartmail_agent::documents::office_crypto;

fn main() -> Result<()> {
    let mut positional: Vec<PathBuf> = Vec::new();
    let mut password = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: smartmail-encrypt <input.docx> <output.docx> [--password <PW>]");
                return Ok(());
            }
            "-p" | "--password" => {
                password = Some(args.next().context("--password requires a value")?);
            }
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let [input, output] = positional.as_slice() else {
        bail!("expected <input.docx> <output.docx>; see --help");
    };

    let password = match password {
        Some(pw) => pw,
        None => {
            eprint!("Enter a password for the document: ");
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).context("reading password")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    if password.is_empty() {
        bail!("Password cannot be empty.");
    }

    let plain = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    if office_crypto::is_encrypted_package(&plain) {
        bail!("{} is already encrypted", input.display());
    }
    let locked = office_crypto::encrypt(&plain, &password)?;
    std::fs::write(output, &locked).with_context(|| format!("writing {}", output.display()))?;

    println!("Encrypted '{}' -> '{}'", input.display(), output.display());
    Ok(())
}
