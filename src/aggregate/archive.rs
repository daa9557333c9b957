//! Local-header handling for ZIP streams
//!
//! `zip::read::read_zipfile_from_stream` needs the entry sizes in the local header. Writers
//! that cannot seek set general-purpose flag bit 3 instead and put the sizes in a data
//! descriptor after the entry data. Such an entry is staged in memory up to its descriptor
//! and handed to the zip reader with a rewritten header; every other entry is read
//! straight off the stream.

use std::io::{self, BufRead, Read};

const LOCAL_HEADER_SIGNATURE: u32 = 0x0403_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
const DATA_DESCRIPTOR_SIGNATURE: [u8; 4] = [0x50, 0x4b, 0x07, 0x08];
const ZIP64_EXTRA_FIELD: u16 = 0x0001;
const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// Fixed part of a local file header
pub(super) const LOCAL_HEADER_LEN: usize = 30;

pub(super) type LocalHeader = [u8; LOCAL_HEADER_LEN];

/// Read the next local file header, or `None` once the central directory starts
pub(super) fn next_local_header<R: Read>(reader: &mut R) -> io::Result<Option<LocalHeader>> {
    let mut header = [0u8; LOCAL_HEADER_LEN];
    reader.read_exact(&mut header[..4])?;
    match le32(&header, 0) {
        LOCAL_HEADER_SIGNATURE => {}
        CENTRAL_HEADER_SIGNATURE | END_OF_CENTRAL_DIRECTORY_SIGNATURE => return Ok(None),
        _ => return Err(invalid("invalid local file header")),
    }
    reader.read_exact(&mut header[4..])?;
    Ok(Some(header))
}

/// Whether the entry's sizes follow its data instead of living in `header`
pub(super) fn has_data_descriptor(header: &LocalHeader) -> bool {
    le16(header, 6) & FLAG_DATA_DESCRIPTOR != 0
}

/// Read a data-descriptor entry through its descriptor
///
/// Returns the entry as a self-contained local entry: the header with the descriptor's
/// CRC and sizes filled in and bit 3 cleared, followed by the name, extra field and data.
/// Nothing past the descriptor is consumed from `reader`.
///
/// The descriptor must carry its optional signature. It is located by the first
/// signature whose compressed size equals the number of data bytes before it; the zip
/// reader then verifies the CRC.
pub(super) fn stage_entry<R: BufRead>(
    mut header: LocalHeader,
    reader: &mut R,
) -> io::Result<Vec<u8>> {
    let name_len = usize::from(le16(&header, 26));
    let extra_len = usize::from(le16(&header, 28));
    let mut names = vec![0u8; name_len + extra_len];
    reader.read_exact(&mut names)?;
    let zip64 = has_zip64_field(&names[name_len..]);

    let mut data = Vec::new();
    let mut scan_from = 0;
    let at = loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "archive ended before the entry's data descriptor",
            ));
        }
        let before = data.len();
        let read = available.len();
        data.extend_from_slice(available);

        match find_descriptor(&data, &mut scan_from, zip64) {
            Some(at) => {
                reader.consume(at + descriptor_len(zip64) - before);
                break at;
            }
            None => reader.consume(read),
        }
    };

    let uncompressed = if zip64 {
        le64(&data, at + 16)
    } else {
        u64::from(le32(&data, at + 12))
    };
    let compressed = u32::try_from(at).map_err(|_| invalid("entry too large to stage"))?;
    let uncompressed =
        u32::try_from(uncompressed).map_err(|_| invalid("entry too large to stage"))?;

    let flags = le16(&header, 6) & !FLAG_DATA_DESCRIPTOR;
    header[6..8].copy_from_slice(&flags.to_le_bytes());
    header[14..18].copy_from_slice(&data[at + 4..at + 8]);
    header[18..22].copy_from_slice(&compressed.to_le_bytes());
    header[22..26].copy_from_slice(&uncompressed.to_le_bytes());
    data.truncate(at);

    let mut staged = Vec::with_capacity(LOCAL_HEADER_LEN + names.len() + data.len());
    staged.extend_from_slice(&header);
    staged.extend_from_slice(&names);
    staged.extend_from_slice(&data);
    Ok(staged)
}

fn descriptor_len(zip64: bool) -> usize {
    if zip64 { 24 } else { 16 }
}

/// Offset of the entry's data descriptor within `data`, if it has arrived yet
///
/// Offsets below `scan_from` were already rejected; it advances past every offset whose
/// whole descriptor window has been checked.
fn find_descriptor(data: &[u8], scan_from: &mut usize, zip64: bool) -> Option<usize> {
    let len = descriptor_len(zip64);
    while *scan_from + len <= data.len() {
        let at = *scan_from;
        if data[at..at + 4] == DATA_DESCRIPTOR_SIGNATURE {
            let compressed = if zip64 {
                le64(data, at + 8)
            } else {
                u64::from(le32(data, at + 8))
            };
            if compressed == at as u64 {
                return Some(at);
            }
        }
        *scan_from += 1;
    }
    None
}

fn has_zip64_field(mut extra: &[u8]) -> bool {
    while extra.len() >= 4 {
        if le16(extra, 0) == ZIP64_EXTRA_FIELD {
            return true;
        }
        let skip = 4 + usize::from(le16(extra, 2));
        extra = extra.get(skip..).unwrap_or_default();
    }
    false
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn le16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le64(bytes: &[u8], at: usize) -> u64 {
    u64::from(le32(bytes, at)) | (u64::from(le32(bytes, at + 4)) << 32)
}
