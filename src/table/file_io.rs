use crate::table::revision::Revision;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Chunk dump file format.
///
/// A gzip stream containing a little-endian `u32` revision count followed
/// by, for each revision, a varint byte length and the raw serialized
/// record. Restoring replays every revision into a fresh transaction, so a
/// dump file is portable between peers.

pub fn store_revisions(path: &Path, revisions: &[Revision]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    let mut gz = GzEncoder::new(file, Compression::default());

    gz.write_all(&(revisions.len() as u32).to_le_bytes())?;
    for revision in revisions {
        let bytes = revision.to_bytes()?;
        write_varint(&mut gz, bytes.len() as u64)?;
        gz.write_all(&bytes)?;
    }
    gz.finish()?;
    Ok(())
}

pub fn load_revisions(path: &Path) -> Result<Vec<Revision>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut gz = GzDecoder::new(file);

    let mut count_bytes = [0u8; 4];
    gz.read_exact(&mut count_bytes)
        .context("chunk file truncated before count")?;
    let count = u32::from_le_bytes(count_bytes);

    let mut revisions = Vec::with_capacity(count as usize);
    for index in 0..count {
        let size = read_varint(&mut gz)
            .with_context(|| format!("reading size of revision {} of {}", index + 1, count))?;
        anyhow::ensure!(size > 0, "zero-sized revision {} of {}", index + 1, count);
        let mut bytes = vec![0u8; size as usize];
        gz.read_exact(&mut bytes)
            .with_context(|| format!("reading revision {} of {}", index + 1, count))?;
        revisions.push(Revision::from_bytes(&bytes)?);
    }
    Ok(revisions)
}

fn write_varint<W: Write>(writer: &mut W, mut value: u64) -> Result<()> {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_all(&[byte])?;
            return Ok(());
        }
        writer.write_all(&[byte | 0x80])?;
    }
}

fn read_varint<R: Read>(reader: &mut R) -> Result<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        value |= u64::from(byte[0] & 0x7f) << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        anyhow::ensure!(shift < 64, "varint too long");
    }
}
