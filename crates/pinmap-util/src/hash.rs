use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha384};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// Prefix of every integrity string produced here.
pub const INTEGRITY_PREFIX: &str = "sha384-";

/// Compute a subresource-integrity string (`sha384-<base64>`) for a byte slice.
#[must_use]
pub fn integrity(data: &[u8]) -> String {
    let digest = Sha384::digest(data);
    format!("{INTEGRITY_PREFIX}{}", STANDARD.encode(digest))
}

/// Compute the integrity string of a file, streaming its content.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn integrity_file(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha384::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!(
        "{INTEGRITY_PREFIX}{}",
        STANDARD.encode(hasher.finalize())
    ))
}

/// Check bytes against an integrity string. Only `sha384` is understood.
#[must_use]
pub fn verify_integrity(data: &[u8], expected: &str) -> bool {
    expected.starts_with(INTEGRITY_PREFIX) && integrity(data) == expected
}
