//! Streaming zip archive writer.
//!
//! An [`Archive`] is a write-once, append-only container: entries are
//! streamed in one after another, nothing is ever rewritten, and the central
//! directory is written by a single call to [`Archive::close`].

use crate::utils::{BackupError, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ARCHIVE_EXTENSION: &str = "zip";

/// A zip file opened for writing.
pub struct Archive {
    path: PathBuf,
    writer: Option<ZipWriter<File>>,
    entries: usize,
    bytes: u64,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("path", &self.path)
            .field("open", &self.writer.is_some())
            .field("entries", &self.entries)
            .finish()
    }
}

fn entry_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644)
        .large_file(true)
}

impl Archive {
    /// Create a new archive at `path`.
    ///
    /// The path must end in `.zip` and must not exist yet.
    pub fn open(path: &Path) -> Result<Self> {
        if path.extension().and_then(|e| e.to_str()) != Some(ARCHIVE_EXTENSION) {
            return Err(BackupError::precondition(format!(
                "destination {} does not end in .{}",
                path.display(),
                ARCHIVE_EXTENSION
            )));
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;

        tracing::debug!(path = %path.display(), "Opened archive for writing");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(ZipWriter::new(file)),
            entries: 0,
            bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Uncompressed bytes written so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn writer_mut(&mut self) -> Result<&mut ZipWriter<File>> {
        self.writer.as_mut().ok_or(BackupError::ArchiveClosed)
    }

    /// Start a new entry and return a sink for its content.
    ///
    /// The entry is complete once the returned writer is dropped and the next
    /// entry is started (or the archive is closed).
    pub fn file_writer(&mut self, logical_path: &str) -> Result<EntryWriter<'_>> {
        let writer = self.writer_mut()?;
        writer.start_file(logical_path, entry_options())?;
        self.entries += 1;

        Ok(EntryWriter {
            archive: self,
            written: 0,
        })
    }

    /// Stream everything from `reader` into a new entry.
    pub fn write_entry<R: Read + ?Sized>(&mut self, logical_path: &str, reader: &mut R) -> Result<u64> {
        let mut entry = self.file_writer(logical_path)?;
        let copied = io::copy(reader, &mut entry).map_err(|e| {
            BackupError::execution(format!("failed to write {logical_path} into archive: {e}"))
        })?;
        Ok(copied)
    }

    /// Copy a local file into a new entry.
    pub fn add_file(&mut self, source: &Path, logical_path: &str) -> Result<u64> {
        let mut file = File::open(source).map_err(|e| {
            BackupError::execution(format!("failed to open {}: {e}", source.display()))
        })?;
        self.write_entry(logical_path, &mut file)
    }

    /// Add a symlink entry whose body is the literal link target.
    pub fn add_symlink(&mut self, logical_path: &str, target: &str) -> Result<()> {
        let writer = self.writer_mut()?;
        writer.add_symlink(logical_path, target, entry_options().unix_permissions(0o777))?;
        self.entries += 1;
        self.bytes += target.len() as u64;
        Ok(())
    }

    /// Write the central directory and release the file handle.
    pub fn close(&mut self) -> Result<()> {
        let writer = self.writer.take().ok_or(BackupError::ArchiveClosed)?;
        let file = writer.finish()?;
        file.sync_all()?;

        tracing::debug!(
            path = %self.path.display(),
            entries = self.entries,
            "Closed archive"
        );
        Ok(())
    }
}

/// Incremental sink for one archive entry.
pub struct EntryWriter<'a> {
    archive: &'a mut Archive,
    written: u64,
}

impl EntryWriter<'_> {
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .archive
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "archive handle is closed"))?;
        let n = writer.write(buf)?;
        self.written += n as u64;
        self.archive.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.archive.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// List the entry names of an existing archive, in archive order.
pub fn list_entries(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;
    let mut names = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        names.push(archive.by_index_raw(index)?.name().to_string());
    }
    Ok(names)
}
