use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

/// Read a map or manifest file, returning `None` when it does not exist.
///
/// Invalid UTF-8 sequences are replaced rather than rejected; the content is
/// JSON and any damage surfaces as a parse error downstream.
///
/// # Errors
/// Returns an error if the file exists but cannot be read.
pub fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write an import map (or any file) so readers never observe a partial write.
///
/// Content goes to a sibling temp file which is then renamed over the target.
///
/// # Errors
/// Returns an error if the write or rename fails.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("importmap.json");
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", std::process::id()));

    {
        let mut file = File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        // Windows refuses to rename over an existing file.
        if cfg!(windows) {
            fs::copy(&temp_path, path)?;
            let _ = fs::remove_file(&temp_path);
            return Ok(());
        }
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_optional_missing() {
        let dir = tempdir().unwrap();
        let content = read_optional(&dir.path().join("importmap.json")).unwrap();
        assert!(content.is_none());
    }

    #[test]
    fn test_read_optional_lossy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("map.json");
        fs::write(&path, [b'{', b'}', 0x80]).unwrap();

        let content = read_optional(&path).unwrap().unwrap();
        assert!(content.starts_with("{}"));
        assert!(content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_atomic_write_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("importmap.json");

        atomic_write(&path, b"{\"imports\":{}}").unwrap();
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_atomic_write_creates_parent_and_cleans_temp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("map.json");

        atomic_write(&path, b"{}").unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join("out"))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["map.json".to_string()]);
    }
}
