//! On-disk index image: a single checksummed byte stream.
//!
//! Layout, all little-endian:
//!
//! ```text
//! [magic u32][format u32][config][structure_version u64]
//! [unit count][unit dict: len, bytes, postings (row-delta varints)]
//! [row bitmap][per-column bitmaps][tombstone bitmap]
//! [crc32 u32]
//! ```
//!
//! The checksum covers everything before it. Any mismatch, short read, or
//! unknown format version surfaces as `IndexError::Corruption`; a loaded
//! image is either the exact structure that was saved or an error.

use crate::error::{IndexError, Result};
use crate::index::builder::Index;
use crate::index::store::PostingsStore;
use crate::index::types::{Posting, PostingList, Unit, WindowConfig, BISCUIT_MAGIC, FORMAT_VERSION};
use crate::utils::encoding::{
    put_u16_le, put_u32_le, put_varint, put_varint_u64, take_bytes, take_u16_le, take_u32_le,
    take_varint, take_varint_u64,
};
use log::info;
use roaring::RoaringBitmap;

/// Serialize an index to its byte image.
pub fn serialize(index: &Index) -> Result<Vec<u8>> {
    let (entries, rows, column_rows, tombstones, structure_version) = index.parts();
    let config = index.config();

    let mut buf = Vec::new();
    put_u32_le(&mut buf, BISCUIT_MAGIC);
    put_u32_le(&mut buf, FORMAT_VERSION);
    put_u32_le(&mut buf, config.window_len);
    put_u32_le(&mut buf, config.stride);
    put_u16_le(&mut buf, config.columns);
    buf.push(config.case_insensitive as u8);
    put_varint_u64(&mut buf, structure_version);

    put_varint_u64(&mut buf, entries.len() as u64);
    for (unit, list) in &entries {
        put_varint(&mut buf, unit.len() as u32);
        buf.extend_from_slice(unit);
        put_varint(&mut buf, list.len() as u32);
        // Postings are (row, column, offset)-sorted, so rows delta-encode
        // well; column and offset stay absolute.
        let mut prev_row = 0;
        for posting in list.iter() {
            put_varint(&mut buf, posting.row - prev_row);
            prev_row = posting.row;
            put_varint(&mut buf, posting.column as u32);
            put_varint(&mut buf, posting.offset);
        }
    }

    write_bitmap(&mut buf, &rows)?;
    put_u16_le(&mut buf, column_rows.len() as u16);
    for bitmap in &column_rows {
        write_bitmap(&mut buf, bitmap)?;
    }
    write_bitmap(&mut buf, &tombstones)?;

    let checksum = crc32fast::hash(&buf);
    put_u32_le(&mut buf, checksum);
    info!(
        "serialized index image: {} units, {} bytes",
        entries.len(),
        buf.len()
    );
    Ok(buf)
}

/// Reconstruct an index from a byte image produced by [`serialize`].
pub fn deserialize(image: &[u8]) -> Result<Index> {
    if image.len() < 8 {
        return Err(IndexError::corruption("image shorter than header"));
    }
    let (body, trailer) = image.split_at(image.len() - 4);
    let mut cursor = trailer;
    let stored = need(take_u32_le(&mut cursor), "checksum")?;
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(IndexError::corruption(format!(
            "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
        )));
    }

    let mut cursor = body;
    let magic = need(take_u32_le(&mut cursor), "magic")?;
    if magic != BISCUIT_MAGIC {
        return Err(IndexError::corruption(format!(
            "bad magic {magic:#010x}, expected {BISCUIT_MAGIC:#010x}"
        )));
    }
    let format = need(take_u32_le(&mut cursor), "format version")?;
    if format != FORMAT_VERSION {
        return Err(IndexError::corruption(format!(
            "unsupported format version {format} (this build reads {FORMAT_VERSION})"
        )));
    }

    let window_len = need(take_u32_le(&mut cursor), "window length")?;
    let stride = need(take_u32_le(&mut cursor), "stride")?;
    let columns = need(take_u16_le(&mut cursor), "column count")?;
    let case_byte = need(take_bytes(&mut cursor, 1), "case flag")?[0];
    let config = WindowConfig {
        window_len,
        stride,
        columns,
        case_insensitive: case_byte != 0,
    };
    config
        .validate()
        .map_err(|e| IndexError::corruption(format!("persisted configuration invalid: {e}")))?;
    let structure_version = need(take_varint_u64(&mut cursor), "structure version")?;

    let unit_count = need(take_varint_u64(&mut cursor), "unit count")? as usize;
    let mut entries: Vec<(Unit, PostingList)> = Vec::with_capacity(unit_count);
    for _ in 0..unit_count {
        let unit_len = need(take_varint(&mut cursor), "unit length")? as usize;
        let unit = need(take_bytes(&mut cursor, unit_len), "unit bytes")?.to_vec();
        let posting_count = need(take_varint(&mut cursor), "posting count")? as usize;
        let mut postings = Vec::with_capacity(posting_count);
        let mut prev_row = 0;
        for _ in 0..posting_count {
            let row = prev_row + need(take_varint(&mut cursor), "posting row delta")?;
            prev_row = row;
            let column = need(take_varint(&mut cursor), "posting column")?;
            let offset = need(take_varint(&mut cursor), "posting offset")?;
            postings.push(Posting {
                row,
                column: column as u16,
                offset,
            });
        }
        entries.push((unit, PostingList::from_sorted(postings)));
    }

    let rows = read_bitmap(&mut cursor)?;
    let bitmap_count = need(take_u16_le(&mut cursor), "column bitmap count")? as usize;
    if bitmap_count != columns as usize {
        return Err(IndexError::corruption(format!(
            "column bitmap count {bitmap_count} does not match {columns} configured columns"
        )));
    }
    let mut column_rows = Vec::with_capacity(bitmap_count);
    for _ in 0..bitmap_count {
        column_rows.push(read_bitmap(&mut cursor)?);
    }
    let tombstones = read_bitmap(&mut cursor)?;

    if !cursor.is_empty() {
        return Err(IndexError::corruption(format!(
            "{} trailing bytes after index image",
            cursor.len()
        )));
    }

    Ok(Index::from_parts(
        config,
        PostingsStore::from_entries(entries),
        rows,
        column_rows,
        tombstones,
        structure_version,
    ))
}

fn need<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| IndexError::corruption(format!("image truncated reading {field}")))
}

fn write_bitmap(buf: &mut Vec<u8>, bitmap: &RoaringBitmap) -> Result<()> {
    let mut bytes = Vec::with_capacity(bitmap.serialized_size());
    bitmap
        .serialize_into(&mut bytes)
        .map_err(|e| IndexError::corruption(format!("bitmap serialization failed: {e}")))?;
    put_varint(buf, bytes.len() as u32);
    buf.extend_from_slice(&bytes);
    Ok(())
}

fn read_bitmap(cursor: &mut &[u8]) -> Result<RoaringBitmap> {
    let len = need(take_varint(cursor), "bitmap length")? as usize;
    let bytes = need(take_bytes(cursor, len), "bitmap bytes")?;
    RoaringBitmap::deserialize_from(bytes)
        .map_err(|e| IndexError::corruption(format!("bitmap deserialization failed: {e}")))
}
