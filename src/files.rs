// ABOUTME: Filesystem helpers for the transfer path: unique names, zip, extract
// ABOUTME: Collisions get a " (n)" suffix before the extension, n counting from 2

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

/// Split a filename into stem and extension, extension keeping its dot.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        // a leading dot is a hidden file, not an extension
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// Create an empty file under `dir`, bumping the name until it is unique.
/// Returns the final name and its full path.
pub fn create_unique_file(dir: &Path, name: &str) -> io::Result<(String, PathBuf)> {
    let (stem, ext) = split_name(name);
    let mut candidate = name.to_string();
    let mut n = 1;
    loop {
        let path = dir.join(&candidate);
        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => return Ok((candidate, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                n += 1;
                candidate = format!("{stem} ({n}){ext}");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Zip one or more files or directories into a new archive in `dest_dir`.
///
/// The archive is named after the first target; entries are stored relative
/// to each target's parent, so a zipped directory appears as a top-level
/// folder. A failed target removes the partial archive. Blocking; run it
/// under `spawn_blocking` from async code.
pub fn create_zip(targets: &[PathBuf], dest_dir: &Path) -> crate::Result<PathBuf> {
    let first = targets
        .first()
        .ok_or("no paths were given to archive")?;
    let base = first
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());

    let (_, zip_path) = create_unique_file(dest_dir, &format!("{base}.zip"))?;

    let result = (|| -> crate::Result<()> {
        let file = fs::File::create(&zip_path)?;
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default();

        for target in targets {
            // entries are named relative to the containing directory
            let anchor = target.parent().unwrap_or_else(|| Path::new(""));
            if target.is_file() {
                add_entry(&mut zip, target, anchor, options)?;
            } else if target.is_dir() {
                for path in walk(target)? {
                    add_entry(&mut zip, &path, anchor, options)?;
                }
            } else {
                return Err(format!("target path does not exist: '{}'", target.display()).into());
            }
        }
        zip.finish()?;
        Ok(())
    })();

    match result {
        Ok(()) => Ok(zip_path),
        Err(e) => {
            let _ = fs::remove_file(&zip_path);
            Err(e)
        }
    }
}

fn add_entry(
    zip: &mut ZipWriter<fs::File>,
    path: &Path,
    anchor: &Path,
    options: FileOptions,
) -> crate::Result<()> {
    let relative = path.strip_prefix(anchor).unwrap_or(path);
    let entry_name = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    zip.start_file(entry_name, options)?;
    let mut src = fs::File::open(path)?;
    io::copy(&mut src, zip)?;
    Ok(())
}

fn walk(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            files.extend(walk(&path)?);
        } else {
            files.push(path);
        }
    }
    Ok(files)
}

/// Extract an archive into `dest`, optionally removing the archive after.
/// Blocking; run it under `spawn_blocking` from async code.
pub fn extract_zip(archive: &Path, dest: &Path, remove_archive: bool) -> crate::Result<()> {
    let file = fs::File::open(archive)?;
    let mut zip = ZipArchive::new(file)?;
    zip.extract(dest)?;
    if remove_archive {
        fs::remove_file(archive)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unique_names_count_from_two() {
        let dir = tempdir().unwrap();
        let (first, _) = create_unique_file(dir.path(), "report.txt").unwrap();
        let (second, _) = create_unique_file(dir.path(), "report.txt").unwrap();
        let (third, _) = create_unique_file(dir.path(), "report.txt").unwrap();
        assert_eq!(first, "report.txt");
        assert_eq!(second, "report (2).txt");
        assert_eq!(third, "report (3).txt");
    }

    #[test]
    fn extensionless_names_suffix_at_the_end() {
        let dir = tempdir().unwrap();
        create_unique_file(dir.path(), "notes").unwrap();
        let (second, _) = create_unique_file(dir.path(), "notes").unwrap();
        assert_eq!(second, "notes (2)");
    }

    #[test]
    fn zip_roundtrip_preserves_contents() {
        let src = tempdir().unwrap();
        let out = tempdir().unwrap();
        let inner = src.path().join("payload");
        fs::create_dir(&inner).unwrap();
        fs::write(inner.join("a.txt"), b"alpha").unwrap();
        fs::write(inner.join("b.txt"), b"beta").unwrap();

        let archive = create_zip(&[inner.clone()], out.path()).unwrap();
        assert_eq!(archive.file_name().unwrap(), "payload.zip");

        let dest = tempdir().unwrap();
        extract_zip(&archive, dest.path(), true).unwrap();
        assert!(!archive.exists());
        assert_eq!(
            fs::read(dest.path().join("payload/a.txt")).unwrap(),
            b"alpha"
        );
        assert_eq!(fs::read(dest.path().join("payload/b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn missing_target_fails_and_cleans_up() {
        let out = tempdir().unwrap();
        let missing = out.path().join("nope.txt");
        assert!(create_zip(&[missing], out.path()).is_err());
        assert!(!out.path().join("nope.zip").exists());
    }
}
