//! Packaging of fitted objects as `model.zip` archives.
//!
//! Fitted transformers and regressors are written as JSON and zipped so a
//! later step (or the model registry) can carry them as a single file.
//! Extraction refuses entries that would land outside the destination.

use crate::error::{ProcessingError, Result};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

/// File name of packaged models.
pub const MODEL_ARCHIVE: &str = "model.zip";

/// Write `entries` (`(name, contents)`) into a deflated zip at `archive_path`.
pub fn pack_entries<P: AsRef<Path>>(archive_path: P, entries: &[(&str, &[u8])]) -> Result<()> {
    let archive_path = archive_path.as_ref();
    if let Some(parent) = archive_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(archive_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, contents) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(contents)?;
        debug!("Packed '{}' ({} bytes)", name, contents.len());
    }
    zip.finish()?;

    info!("Wrote archive {}", archive_path.display());
    Ok(())
}

/// Extract every file of the archive into `dest`, returning the written paths.
///
/// The whole archive is checked before anything is written, so a hostile
/// entry leaves `dest` untouched.
pub fn safe_extract<P: AsRef<Path>, Q: AsRef<Path>>(archive_path: P, dest: Q) -> Result<Vec<PathBuf>> {
    let dest = dest.as_ref();
    let mut archive = ZipArchive::new(File::open(archive_path.as_ref())?)?;

    let mut targets = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let entry = archive.by_index(i)?;
        let relative = checked_entry_path(entry.name())?;
        targets.push((i, entry.is_dir(), dest.join(relative)));
    }

    fs::create_dir_all(dest)?;
    let mut written = Vec::new();
    for (i, is_dir, out_path) in targets {
        if is_dir {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut entry = archive.by_index(i)?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        fs::write(&out_path, &buf)?;
        written.push(out_path);
    }

    info!(
        "Extracted {} file(s) from {} into {}",
        written.len(),
        archive_path.as_ref().display(),
        dest.display()
    );
    Ok(written)
}

/// Read one named entry without touching the filesystem.
pub fn read_entry<P: AsRef<Path>>(archive_path: P, name: &str) -> Result<Vec<u8>> {
    let mut archive = ZipArchive::new(File::open(archive_path.as_ref())?)?;
    let mut entry = archive.by_name(name)?;
    let mut buf = Vec::new();
    entry.read_to_end(&mut buf)?;
    Ok(buf)
}

/// Names of the entries stored in the archive.
pub fn list_entries<P: AsRef<Path>>(archive_path: P) -> Result<Vec<String>> {
    let archive = ZipArchive::new(File::open(archive_path.as_ref())?)?;
    Ok(archive.file_names().map(str::to_string).collect())
}

fn checked_entry_path(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => return Err(ProcessingError::PathTraversal(name.to_string())),
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ProcessingError::PathTraversal(name.to_string()));
    }
    Ok(clean)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_extract() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("out").join(MODEL_ARCHIVE);

        pack_entries(&archive, &[("model.json", "{\"a\":1}".as_bytes())]).unwrap();
        let written = safe_extract(&archive, dir.path().join("extracted")).unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(fs::read_to_string(&written[0]).unwrap(), "{\"a\":1}");
        assert_eq!(read_entry(&archive, "model.json").unwrap(), b"{\"a\":1}");
        assert_eq!(list_entries(&archive).unwrap(), vec!["model.json".to_string()]);
    }

    #[test]
    fn test_extract_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        pack_entries(
            &archive,
            &[("ok.txt", "fine".as_bytes()), ("../evil.txt", "bad".as_bytes())],
        ).unwrap();

        let dest = dir.path().join("dest");
        let err = safe_extract(&archive, &dest).unwrap_err();

        assert_eq!(err.error_code(), "PATH_TRAVERSAL");
        assert!(!dir.path().join("evil.txt").exists());
        assert!(!dest.join("ok.txt").exists());
    }

    #[test]
    fn test_checked_entry_path() {
        assert_eq!(checked_entry_path("./a/b.json").unwrap(), PathBuf::from("a/b.json"));
        assert!(checked_entry_path("/etc/passwd").is_err());
        assert!(checked_entry_path("a/../../b").is_err());
    }
}
