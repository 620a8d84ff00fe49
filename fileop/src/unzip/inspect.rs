//! Validation of an in-memory zip archive against resource limits before anything is extracted.
use crate::Result;
use bytes::Bytes;
use snafu::prelude::*;
use std::io::Cursor;
use tracing::debug;

/// Resource limits applied to an archive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ArchiveLimits {
    pub max_archive_size: u64,
    pub max_entry_size: u64,
    pub max_entry_count: usize,
}

impl From<&crate::Config> for ArchiveLimits {
    fn from(config: &crate::Config) -> Self {
        Self {
            max_archive_size: config.unzip_max_zip_file_length,
            max_entry_size: config.unzip_max_file_length,
            max_entry_count: config.unzip_max_file_count,
        }
    }
}

/// One record of the archive's central directory.  No content has been read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ArchiveEntry {
    /// Position of the entry in the central directory
    pub index: usize,

    /// The name exactly as stored in the archive, in an unknown encoding
    pub raw_name: Vec<u8>,

    /// Uncompressed size as declared in the central directory
    pub uncompressed_size: u64,

    pub is_directory: bool,
}

/// An archive that passed inspection, along with its enumerated entries in archive order
pub(crate) struct InspectedArchive {
    pub archive: zip::ZipArchive<Cursor<Bytes>>,
    pub entries: Vec<ArchiveEntry>,
}

impl std::fmt::Debug for InspectedArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InspectedArchive")
            .field("archive", &"<...>")
            .field("entries", &self.entries)
            .finish()
    }
}

impl InspectedArchive {
    /// Total declared uncompressed size of all entries
    pub fn total_uncompressed_size(&self) -> u64 {
        self.entries.iter().map(|entry| entry.uncompressed_size).sum()
    }
}

/// Whether an entry is a directory, judged from its raw name and its attributes.
///
/// `ZipFile::is_dir` also treats a trailing `\` as a directory marker, but in a GBK name `0x5C`
/// can be the second byte of a two-byte character, so only `/` counts here.
fn is_directory_entry(raw_name: &[u8], unix_mode: Option<u32>) -> bool {
    const S_IFMT: u32 = 0o170000;
    const S_IFDIR: u32 = 0o040000;

    raw_name.ends_with(b"/") || unix_mode.is_some_and(|mode| mode & S_IFMT == S_IFDIR)
}

/// Open an archive and check it against `limits`.
///
/// All checks complete before this returns, so a violation anywhere in the archive, even in the
/// very last entry, fails the job before any entry is extracted.
pub(crate) fn inspect_archive(data: Bytes, limits: ArchiveLimits) -> Result<InspectedArchive> {
    let size = data.len() as u64;
    ensure!(
        size <= limits.max_archive_size,
        crate::error::OversizedArchiveSnafu {
            size,
            limit: limits.max_archive_size
        }
    );

    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .with_context(|_| crate::error::InvalidArchiveSnafu {})?;

    let count = archive.len();
    ensure!(
        count <= limits.max_entry_count,
        crate::error::TooManyEntriesSnafu {
            count,
            limit: limits.max_entry_count
        }
    );

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        // The raw accessor reads only the headers and doesn't set up decompression
        let file = archive
            .by_index_raw(index)
            .with_context(|_| crate::error::InvalidArchiveSnafu {})?;

        let entry = ArchiveEntry {
            index,
            raw_name: file.name_raw().to_vec(),
            uncompressed_size: file.size(),
            is_directory: is_directory_entry(file.name_raw(), file.unix_mode()),
        };

        ensure!(
            entry.uncompressed_size <= limits.max_entry_size,
            crate::error::EntryTooLargeSnafu {
                name: String::from_utf8_lossy(&entry.raw_name),
                size: entry.uncompressed_size,
                limit: limits.max_entry_size
            }
        );

        entries.push(entry);
    }

    debug!(entries = entries.len(), archive_size = size, "Zip archive passed inspection");

    Ok(InspectedArchive { archive, entries })
}
