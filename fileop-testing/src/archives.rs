//! Build zip archives in memory for use as test input
use crate::Result;
use bytes::Bytes;
use rand::prelude::*;
use std::io::{Cursor, Write};

/// One entry of a test archive
#[derive(Clone, Debug)]
pub enum TestEntry {
    File { name: String, data: Vec<u8> },
    Directory { name: String },
}

impl TestEntry {
    /// A file of random data, with the size specified as a string so we can use human-friendly
    /// units like "10 KB" or "20 MiB"
    pub fn file(name: impl Into<String>, size: impl AsRef<str>) -> Self {
        let size = byte_unit::Byte::from_str(size).unwrap().get_bytes() as usize;
        let mut data = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut data);

        Self::File {
            name: name.into(),
            data,
        }
    }

    /// A file with exactly the given contents
    pub fn file_with_contents(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::File {
            name: name.into(),
            data: data.into(),
        }
    }

    /// A directory.  The trailing `/` is added if it's missing.
    pub fn dir(name: impl Into<String>) -> Self {
        let mut name = name.into();
        if !name.ends_with('/') {
            name.push('/');
        }

        Self::Directory { name }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::File { name, .. } | Self::Directory { name } => name,
        }
    }

    /// The contents if this is a file
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::File { data, .. } => Some(data),
            Self::Directory { .. } => None,
        }
    }
}

/// Build a deflate-compressed zip archive with the given entries in order
pub fn make_zip(entries: &[TestEntry]) -> Result<Bytes> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in entries {
        match entry {
            TestEntry::File { name, data } => {
                writer.start_file(name.as_str(), options)?;
                writer.write_all(data)?;
            }
            TestEntry::Directory { name } => {
                writer.add_directory(name.as_str(), options)?;
            }
        }
    }

    Ok(Bytes::from(writer.finish()?.into_inner()))
}

/// Build an uncompressed zip archive whose entry names are stored as the exact bytes given, with
/// the UTF-8 flag clear.
///
/// This is how zip tools on legacy-codepage systems write non-ASCII names, and `zip::ZipWriter`
/// can't be made to do it.  Names ending in `/` are directories and must have empty contents.
pub fn make_zip_with_raw_names(entries: &[(&[u8], &[u8])]) -> Bytes {
    let entries = entries
        .iter()
        .map(|(name, data)| (*name, *data, data.len() as u32))
        .collect::<Vec<_>>();

    make_stored_zip(&entries)
}

/// Build an uncompressed zip archive with one file whose headers claim an uncompressed size of
/// `declared_size`, whatever the actual length of `data`.
///
/// Used to check that extraction doesn't trust the headers.
pub fn make_zip_with_declared_size(name: &str, data: &[u8], declared_size: u32) -> Bytes {
    make_stored_zip(&[(name.as_bytes(), data, declared_size)])
}

/// Stored entries of `(raw name, data, declared uncompressed size)`
fn make_stored_zip(entries: &[(&[u8], &[u8], u32)]) -> Bytes {
    const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
    const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
    const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
    const VERSION: u16 = 20;
    // 1980-01-01 00:00
    const DOS_DATE: u16 = 0x0021;
    const DIRECTORY_ATTRIBUTE: u32 = 0x10;

    fn u16_le(buffer: &mut Vec<u8>, value: u16) {
        buffer.extend_from_slice(&value.to_le_bytes());
    }

    fn u32_le(buffer: &mut Vec<u8>, value: u32) {
        buffer.extend_from_slice(&value.to_le_bytes());
    }

    let mut archive = Vec::new();
    let mut central_directory = Vec::new();

    for (name, data, declared_size) in entries {
        let offset = archive.len() as u32;
        let crc = crc32fast::hash(data);
        let is_directory = name.ends_with(b"/");

        // Local file header, then the stored data
        u32_le(&mut archive, LOCAL_HEADER_SIGNATURE);
        u16_le(&mut archive, VERSION);
        u16_le(&mut archive, 0); // flags
        u16_le(&mut archive, 0); // stored
        u16_le(&mut archive, 0); // time
        u16_le(&mut archive, DOS_DATE);
        u32_le(&mut archive, crc);
        u32_le(&mut archive, data.len() as u32);
        u32_le(&mut archive, *declared_size);
        u16_le(&mut archive, name.len() as u16);
        u16_le(&mut archive, 0); // extra field length
        archive.extend_from_slice(name);
        archive.extend_from_slice(data);

        u32_le(&mut central_directory, CENTRAL_HEADER_SIGNATURE);
        u16_le(&mut central_directory, VERSION); // made by
        u16_le(&mut central_directory, VERSION); // needed to extract
        u16_le(&mut central_directory, 0);
        u16_le(&mut central_directory, 0);
        u16_le(&mut central_directory, 0);
        u16_le(&mut central_directory, DOS_DATE);
        u32_le(&mut central_directory, crc);
        u32_le(&mut central_directory, data.len() as u32);
        u32_le(&mut central_directory, *declared_size);
        u16_le(&mut central_directory, name.len() as u16);
        u16_le(&mut central_directory, 0); // extra field length
        u16_le(&mut central_directory, 0); // comment length
        u16_le(&mut central_directory, 0); // disk number
        u16_le(&mut central_directory, 0); // internal attributes
        u32_le(
            &mut central_directory,
            if is_directory { DIRECTORY_ATTRIBUTE } else { 0 },
        );
        u32_le(&mut central_directory, offset);
        central_directory.extend_from_slice(name);
    }

    let central_directory_offset = archive.len() as u32;
    let central_directory_size = central_directory.len() as u32;
    archive.extend_from_slice(&central_directory);

    u32_le(&mut archive, END_OF_CENTRAL_DIRECTORY_SIGNATURE);
    u16_le(&mut archive, 0); // this disk
    u16_le(&mut archive, 0); // disk with the central directory
    u16_le(&mut archive, entries.len() as u16);
    u16_le(&mut archive, entries.len() as u16);
    u32_le(&mut archive, central_directory_size);
    u32_le(&mut archive, central_directory_offset);
    u16_le(&mut archive, 0); // comment length

    Bytes::from(archive)
}
