//! Archive transfer
//!
//! Moves submissions and starter code across the wire as zip archives:
//! extracting an uploaded archive into an isolated directory, and packing a
//! challenge directory into a distributable archive while honoring an
//! ignore list of path substrings.

use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use futures_util::{Stream, StreamExt};
use tracing::debug;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::GradeError;

/// Drain a (possibly guard-wrapped) upload stream and inflate it into
/// `dest`. A decode failure is [`GradeError::MalformedArchive`]; errors
/// from the stream itself, notably [`GradeError::SizeExceeded`] from an
/// upstream meter, propagate unchanged. On any error the caller is free
/// to discard `dest` wholesale; nothing here claims partial success.
pub async fn extract_stream<S, B>(mut stream: S, dest: &Path) -> Result<(), GradeError>
where
    S: Stream<Item = Result<B, GradeError>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.extend_from_slice(chunk.as_ref());
    }
    debug!("collected {} upload bytes", buf.len());

    extract_zip(Cursor::new(buf), dest)
}

/// Inflate a zip archive into `dest` with zip-slip protection: entries
/// whose names escape the destination are skipped rather than written.
pub fn extract_zip<R: Read + Seek>(data: R, dest: &Path) -> Result<(), GradeError> {
    let mut archive = ZipArchive::new(data).map_err(malformed)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(malformed)?;

        let file_path = match file.enclosed_name() {
            Some(path) => path.to_owned(),
            None => continue,
        };

        let outpath = dest.join(&file_path);

        if file.name().ends_with('/') {
            std::fs::create_dir_all(&outpath)
                .with_context(|| format!("failed to create {}", outpath.display()))?;
        } else {
            if let Some(parent) = outpath.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            let mut outfile = std::fs::File::create(&outpath)
                .with_context(|| format!("failed to create {}", outpath.display()))?;
            std::io::copy(&mut file, &mut outfile)
                .with_context(|| format!("failed to write {}", outpath.display()))?;
        }
    }

    Ok(())
}

fn malformed(err: ZipError) -> GradeError {
    match err {
        ZipError::Io(io) => GradeError::Internal(io.into()),
        other => GradeError::MalformedArchive(other.to_string()),
    }
}

/// Pack every file under `source` into a zip archive, excluding any file
/// whose relative path contains one of `ignore` as a substring. Substring
/// match, not glob. Enumeration order is unspecified and archive bytes are
/// not guaranteed deterministic, but the packed name set is.
pub fn pack_dir(source: &Path, ignore: &[String]) -> Result<Vec<u8>> {
    let files = collect_files(source, ignore)?;

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);

        for relative in &files {
            let full = source.join(relative);
            let name = zip_entry_name(relative);
            writer
                .start_file(name, SimpleFileOptions::default())
                .with_context(|| format!("failed to add {} to archive", relative.display()))?;
            let contents = std::fs::read(&full)
                .with_context(|| format!("failed to read {}", full.display()))?;
            writer.write_all(&contents)?;
        }

        writer.finish().context("failed to finalize archive")?;
    }

    Ok(cursor.into_inner())
}

/// Relative paths of every file under `source` surviving the ignore list,
/// sorted for stable comparison.
pub fn collect_files(source: &Path, ignore: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(source, source, ignore, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(root: &Path, dir: &Path, ignore: &[String], out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .expect("walked path is always under root")
            .to_path_buf();

        if is_ignored(&relative, ignore) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, ignore, out)?;
        } else if file_type.is_file() {
            out.push(relative);
        }
    }
    Ok(())
}

fn is_ignored(relative: &Path, ignore: &[String]) -> bool {
    let text = zip_entry_name(relative);
    ignore.iter().any(|pattern| text.contains(pattern.as_str()))
}

/// Forward-slash entry name regardless of host platform.
fn zip_entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
