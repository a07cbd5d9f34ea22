use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;

use crate::error::EclipError;

/// Replaces `archive` (a `.gz` file) with its decompressed content and returns
/// the path of the decompressed file.
pub fn gunzip_in_place(archive: &Path) -> Result<PathBuf, EclipError> {
    let target = decompressed_path(archive).ok_or_else(|| EclipError::Decompress {
        path: archive.to_path_buf(),
        message: "file name does not end with .gz".to_string(),
    })?;
    let parent = target
        .parent()
        .ok_or_else(|| EclipError::Filesystem("invalid decompression target".to_string()))?;

    let file = fs::File::open(archive).map_err(|err| EclipError::Decompress {
        path: archive.to_path_buf(),
        message: err.to_string(),
    })?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let mut temp = tempfile::Builder::new()
        .prefix("eclip-fold-gunzip")
        .tempfile_in(parent)
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut temp).map_err(|err| EclipError::Decompress {
        path: archive.to_path_buf(),
        message: err.to_string(),
    })?;

    if target.exists() {
        fs::remove_file(&target).map_err(|err| EclipError::Filesystem(err.to_string()))?;
    }
    temp.persist(&target)
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    fs::remove_file(archive).map_err(|err| EclipError::Filesystem(err.to_string()))?;
    Ok(target)
}

pub fn decompressed_path(archive: &Path) -> Option<PathBuf> {
    let name = archive.file_name()?.to_str()?;
    let stem = name.strip_suffix(".gz").filter(|stem| !stem.is_empty())?;
    Some(archive.with_file_name(stem))
}

pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), EclipError> {
    let parent = path
        .parent()
        .ok_or_else(|| EclipError::Filesystem("invalid destination path".to_string()))?;
    fs::create_dir_all(parent).map_err(|err| EclipError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("eclip-fold-file")
        .tempfile_in(parent)
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    fs::write(temp.path(), content).map_err(|err| EclipError::Filesystem(err.to_string()))?;
    if path.exists() {
        fs::remove_file(path).map_err(|err| EclipError::Filesystem(err.to_string()))?;
    }
    temp.persist(path)
        .map_err(|err| EclipError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn sorted_subdirs(root: &Path) -> Result<Vec<PathBuf>, EclipError> {
    let entries = fs::read_dir(root)
        .map_err(|err| EclipError::Filesystem(format!("read {}: {err}", root.display())))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| EclipError::Filesystem(err.to_string()))?;
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>, EclipError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| EclipError::Filesystem(format!("read {}: {err}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| EclipError::Filesystem(err.to_string()))?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.ends_with(suffix))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn gunzip_replaces_archive() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("peaks.bed.gz");
        let mut encoder = GzEncoder::new(fs::File::create(&archive).unwrap(), Compression::default());
        encoder.write_all(b"chr1\t10\t20\n").unwrap();
        encoder.finish().unwrap();

        let target = gunzip_in_place(&archive).unwrap();

        assert_eq!(target, temp.path().join("peaks.bed"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "chr1\t10\t20\n");
        assert!(!archive.exists());
    }

    #[test]
    fn gunzip_rejects_corrupt_archive() {
        let temp = tempfile::tempdir().unwrap();
        let archive = temp.path().join("broken.bed.gz");
        fs::write(&archive, b"not gzip").unwrap();

        let err = gunzip_in_place(&archive).unwrap_err();
        assert!(matches!(err, EclipError::Decompress { .. }));
        assert!(!temp.path().join("broken.bed").exists());
    }

    #[test]
    fn decompressed_path_requires_gz_suffix() {
        assert_eq!(
            decompressed_path(Path::new("/data/a.bed.gz")),
            Some(PathBuf::from("/data/a.bed"))
        );
        assert_eq!(decompressed_path(Path::new("/data/a.bed")), None);
        assert_eq!(decompressed_path(Path::new("/data/.gz")), None);
    }

    #[test]
    fn suffix_listing_skips_directories() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("b_out.txt"), "").unwrap();
        fs::write(temp.path().join("a_out.txt"), "").unwrap();
        fs::write(temp.path().join("a_log.txt"), "").unwrap();
        fs::create_dir(temp.path().join("nested_out.txt")).unwrap();

        let files = files_with_suffix(temp.path(), "_out.txt").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a_out.txt", "b_out.txt"]);
    }
}
