//! Gzipped-tar extraction with top-level-dir stripping and path-escape
//! safety checks (§4.E).

use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::InstallerError;

/// Strips the archive entry's first path component (its top-level wrapper
/// directory) and resolves it against `install_dir`, rejecting any path
/// that would escape it.
fn resolve_entry_path(install_dir: &Path, entry_path: &Path) -> Result<Option<PathBuf>, InstallerError> {
    let mut components = entry_path.components();
    components.next(); // drop the wrapper directory
    let rest: PathBuf = components.collect();
    if rest.as_os_str().is_empty() {
        return Ok(None);
    }

    if rest.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(InstallerError::PathEscape(entry_path.display().to_string()));
    }

    let resolved = install_dir.join(&rest);
    let normalized_install = install_dir.components().collect::<PathBuf>();
    let normalized_resolved = resolved.components().collect::<PathBuf>();
    if !normalized_resolved.starts_with(&normalized_install) {
        return Err(InstallerError::PathEscape(entry_path.display().to_string()));
    }
    Ok(Some(resolved))
}

/// Extracts `archive_path` (a gzipped tar) into `install_dir`, stripping
/// the archive's top-level directory and ignoring entries of unsupported
/// types.
pub fn extract_tar_gz(archive_path: &Path, install_dir: &Path) -> Result<(), InstallerError> {
    fs::create_dir_all(install_dir)?;

    let file = fs::File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_path = entry.path()?.to_path_buf();
        let Some(dest) = resolve_entry_path(install_dir, &entry_path)? else {
            continue; // the wrapper directory entry itself
        };

        let kind = entry.header().entry_type();
        if kind.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if kind.is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;
        } else if kind.is_symlink() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&dest)?;
        } else {
            return Err(InstallerError::UnsupportedEntryType(entry_path.display().to_string()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tar::{Builder, Header};
    use tempfile::tempdir;

    fn build_archive(path: &Path, entries: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = Builder::new(encoder);
        for (name, data) in entries {
            let mut header = Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn extracts_and_strips_top_level_directory() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        build_archive(&archive, &[("seatunnel-2.3.0/conf/hazelcast.yaml", b"key: value")]);

        let install_dir = dir.path().join("install");
        extract_tar_gz(&archive, &install_dir).unwrap();

        let extracted = install_dir.join("conf/hazelcast.yaml");
        assert_eq!(fs::read_to_string(extracted).unwrap(), "key: value");
    }

    #[test]
    fn rejects_entries_that_escape_install_dir() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        build_archive(&archive, &[("seatunnel-2.3.0/../../etc/passwd", b"pwned")]);

        let install_dir = dir.path().join("install");
        let err = extract_tar_gz(&archive, &install_dir);
        assert!(matches!(err, Err(InstallerError::PathEscape(_))));
    }

    #[test]
    fn writes_past_wrapper_directory_entry_itself() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("pkg.tar.gz");
        build_archive(&archive, &[("seatunnel-2.3.0/", b"")]);

        let install_dir = dir.path().join("install");
        extract_tar_gz(&archive, &install_dir).unwrap();
        assert!(install_dir.exists());
    }
}
