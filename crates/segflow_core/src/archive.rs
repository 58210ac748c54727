//! `.tar.gz` packaging used to move cases and results over the wire.
//!
//! These functions block; async callers should run them on a blocking thread.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tar::{Archive, Builder};

/// Whether a file name looks like an archive accepted by [`unpack`].
pub fn is_archive_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".tar.gz") || lower.ends_with(".tgz")
}

/// Writes `files` into a gzip-compressed tarball at `dest`, each under the given archive name.
pub fn pack_files<P: AsRef<Path>>(files: &[(P, String)], dest: &Path) -> io::Result<()> {
    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut tar = Builder::new(encoder);

    for (path, name) in files {
        tar.append_file(name, &mut File::open(path.as_ref())?)?;
    }

    tar.into_inner()?.finish()?.flush()
}

/// Writes every regular file below `dir` into a gzip-compressed tarball on `writer`.
///
/// Entry names are relative to `dir`. Returns the writer once the archive is complete.
pub fn pack_dir<W: Write>(dir: &Path, writer: W) -> io::Result<W> {
    fn append_dir_all<W: Write>(
        tar: &mut Builder<GzEncoder<W>>,
        path: &Path,
        base: &Path,
    ) -> io::Result<()> {
        let mut entries = fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let path = entry.path();
            let name = path.strip_prefix(base).map_err(io::Error::other)?;

            if entry.file_type()?.is_dir() {
                append_dir_all(tar, &path, base)?;
            } else {
                tar.append_file(name, &mut File::open(&path)?)?;
            }
        }
        Ok(())
    }

    let mut tar = Builder::new(GzEncoder::new(writer, Compression::default()));
    append_dir_all(&mut tar, dir, dir)?;
    tar.into_inner()?.finish()
}

/// Extracts a gzip-compressed tarball into `dest`, creating it if needed.
///
/// Entries that would escape `dest` are skipped.
pub fn unpack(archive: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    let mut archive = Archive::new(GzDecoder::new(File::open(archive)?));
    archive.unpack(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_files_unpack_under_their_archive_names() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("A_0000.nii.gz");
        fs::write(&src, b"channel zero").unwrap();

        let tarball = dir.path().join("A.tar.gz");
        pack_files(&[(&src, "case_0000.nii.gz".to_string())], &tarball).unwrap();

        let out = dir.path().join("out");
        unpack(&tarball, &out).unwrap();
        assert_eq!(
            fs::read(out.join("case_0000.nii.gz")).unwrap(),
            b"channel zero"
        );
    }

    #[test]
    fn packed_directory_keeps_relative_layout() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("prediction.nii.gz"), b"p").unwrap();
        fs::write(src.join("nested").join("extra.txt"), b"e").unwrap();

        let tarball = dir.path().join("result.tar.gz");
        pack_dir(&src, File::create(&tarball).unwrap()).unwrap();

        let out = dir.path().join("out");
        unpack(&tarball, &out).unwrap();
        assert!(out.join("prediction.nii.gz").is_file());
        assert!(out.join("nested").join("extra.txt").is_file());
    }

    #[test]
    fn recognizes_archive_names() {
        assert!(is_archive_name("case.tar.gz"));
        assert!(is_archive_name("CASE.TGZ"));
        assert!(!is_archive_name("case.nii.gz"));
    }
}
