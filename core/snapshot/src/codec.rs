//! Snapshot archive encoding and decoding.
//!
//! A snapshot is a ZIP archive holding `manifest.json` and a flat `media/`
//! directory. The manifest is deflated; media blobs are stored as-is since
//! images are already compressed.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::io::{Cursor, Read, Write};
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use notesync_common::{Error, Result};

use crate::manifest::{
    media_file_name, Manifest, ManifestEntry, ManifestMedia, MANIFEST_PATH, SCHEMA_VERSION,
};
use crate::model::SnapshotContents;

/// Local file header signature of a ZIP archive.
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Whether `bytes` look like a plain (unencrypted) snapshot archive.
pub fn is_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

/// Encode `contents` into a snapshot archive stamped with the current time.
pub fn encode(contents: &SnapshotContents) -> Result<Vec<u8>> {
    encode_at(contents, Utc::now())
}

/// Encode `contents` with an explicit export timestamp.
pub fn encode_at(contents: &SnapshotContents, exported_at: DateTime<Utc>) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let manifest_options =
        SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let media_options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut manifest = Manifest {
        schema_version: SCHEMA_VERSION,
        exported_at,
        settings: contents.settings.clone(),
        entries: contents.entries.iter().map(ManifestEntry::from_entry).collect(),
        media: Vec::with_capacity(contents.media.len()),
    };

    let mut written = HashSet::new();
    for media in &contents.media {
        if media.is_deleted() {
            manifest.media.push(ManifestMedia::from_media(media, None));
            continue;
        }

        let mut file = media_file_name(&media.key, &media.mime_type);
        if !written.insert(file.clone()) {
            // Two keys sanitized to the same name.
            file = format!("{}-{}", file, written.len());
            written.insert(file.clone());
        }

        zip.start_file(file.as_str(), media_options)
            .map_err(|e| Error::Serialization(format!("Failed to start media file: {}", e)))?;
        zip.write_all(&media.data)?;

        manifest
            .media
            .push(ManifestMedia::from_media(media, Some(file)));
    }

    let manifest_json = serde_json::to_vec_pretty(&manifest)?;
    zip.start_file(MANIFEST_PATH, manifest_options)
        .map_err(|e| Error::Serialization(format!("Failed to start manifest: {}", e)))?;
    zip.write_all(&manifest_json)?;

    let cursor = zip
        .finish()
        .map_err(|e| Error::Serialization(format!("Failed to finish archive: {}", e)))?;

    debug!(
        "Encoded snapshot: {} entries, {} media",
        manifest.entries.len(),
        manifest.media.len()
    );

    Ok(cursor.into_inner())
}

/// Read and validate only the manifest of an archive.
///
/// # Errors
/// - `CorruptArchive` if the bytes are not an archive, the manifest is
///   missing or unparsable, or its schema is newer than supported
pub fn read_manifest(bytes: &[u8]) -> Result<Manifest> {
    let mut archive = open_archive(bytes)?;
    read_manifest_from(&mut archive)
}

/// Decode a snapshot archive.
///
/// Media referenced by the manifest but absent from the archive is skipped
/// with a warning.
pub fn decode(bytes: &[u8]) -> Result<SnapshotContents> {
    let mut archive = open_archive(bytes)?;
    let manifest = read_manifest_from(&mut archive)?;

    let entries = manifest
        .entries
        .into_iter()
        .map(ManifestEntry::into_entry)
        .collect();

    let mut media = Vec::with_capacity(manifest.media.len());
    for record in manifest.media {
        if record.deleted_at.is_some() {
            media.push(record.into_media(Vec::new()));
            continue;
        }

        let Some(file) = record.file.clone() else {
            warn!("Media {} has no file reference, skipping", record.key);
            continue;
        };

        match read_file(&mut archive, &file)? {
            Some(data) => media.push(record.into_media(data)),
            None => warn!("Media file {} missing from snapshot, skipping", file),
        }
    }

    Ok(SnapshotContents {
        entries,
        media,
        settings: manifest.settings,
    })
}

fn open_archive(bytes: &[u8]) -> Result<ZipArchive<Cursor<&[u8]>>> {
    ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| Error::CorruptArchive(format!("Not a snapshot archive: {}", e)))
}

fn read_manifest_from(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Manifest> {
    let raw = read_file(archive, MANIFEST_PATH)?
        .ok_or_else(|| Error::CorruptArchive("Manifest missing".to_string()))?;

    let manifest: Manifest = serde_json::from_slice(&raw)
        .map_err(|e| Error::CorruptArchive(format!("Manifest unparsable: {}", e)))?;

    if manifest.schema_version > SCHEMA_VERSION {
        return Err(Error::CorruptArchive(format!(
            "Unsupported schema version {} (max {})",
            manifest.schema_version, SCHEMA_VERSION
        )));
    }

    Ok(manifest)
}

fn read_file(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<Option<Vec<u8>>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(Error::CorruptArchive(format!(
                "Failed to read {}: {}",
                name, e
            )))
        }
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|e| Error::CorruptArchive(format!("Failed to read {}: {}", name, e)))?;
    Ok(Some(data))
}
