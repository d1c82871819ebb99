//! Reads the playing time of an MP4/MOV/M4V file from its box headers.
//!
//! Only the top-level box list and the movie header (`moov/mvhd`) are
//! visited; sample data is skipped by seeking, so the cost does not depend
//! on file size. Layout follows ISO/IEC 14496-12.

use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, trace};

use crate::errors::MediaError;

const fn fourcc(code: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*code)
}

const FTYP: u32 = fourcc(b"ftyp");
const MOOV: u32 = fourcc(b"moov");
const MVHD: u32 = fourcc(b"mvhd");
const MDAT: u32 = fourcc(b"mdat");
const FREE: u32 = fourcc(b"free");
const SKIP: u32 = fourcc(b"skip");
const WIDE: u32 = fourcc(b"wide");
const PNOT: u32 = fourcc(b"pnot");

/// Box types a file may legitimately start with.
const LEADING_BOXES: [u32; 7] = [FTYP, MOOV, MDAT, FREE, SKIP, WIDE, PNOT];

fn fourcc_to_string(code: u32) -> String {
    code.to_be_bytes()
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

#[derive(Clone, Copy, Debug)]
struct BoxHeader {
    box_type: u32,
    /// Total size including the header; 0 means "to end of file".
    size: u64,
    offset: u64,
    header_size: u64,
}

impl BoxHeader {
    /// `Ok(None)` for a box that runs to end of file.
    fn end_offset(&self) -> Result<Option<u64>, MediaError> {
        if self.size == 0 {
            return Ok(None);
        }
        self.offset
            .checked_add(self.size)
            .map(Some)
            .ok_or_else(|| MediaError::Probe("box size overflows".into()))
    }
}

fn truncated(e: std::io::Error) -> MediaError {
    if e.kind() == ErrorKind::UnexpectedEof {
        MediaError::Probe("header truncated".into())
    } else {
        MediaError::Io(e)
    }
}

/// Reads the box header at the current position; `None` at end of input.
fn read_box_header<R: Read + Seek>(reader: &mut R) -> Result<Option<BoxHeader>, MediaError> {
    let offset = reader.stream_position()?;
    let size32 = match reader.read_u32::<BigEndian>() {
        Ok(v) => v,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(MediaError::Io(e)),
    };
    let box_type = reader.read_u32::<BigEndian>().map_err(truncated)?;
    let (size, header_size) = match size32 {
        0 => (0, 8),
        1 => (reader.read_u64::<BigEndian>().map_err(truncated)?, 16),
        n => (u64::from(n), 8),
    };
    if size != 0 && size < header_size {
        return Err(MediaError::Probe(format!(
            "box '{}' at offset {} has invalid size {}",
            fourcc_to_string(box_type),
            offset,
            size
        )));
    }
    trace!("Box '{}' at offset {}, size {}", fourcc_to_string(box_type), offset, size);
    Ok(Some(BoxHeader { box_type, size, offset, header_size }))
}

/// Parses the `mvhd` payload; the reader sits just after the box header.
fn parse_mvhd<R: Read>(reader: &mut R) -> Result<Duration, MediaError> {
    let version = reader.read_u8().map_err(truncated)?;
    let mut flags = [0u8; 3];
    reader.read_exact(&mut flags).map_err(truncated)?;

    let (timescale, duration, unknown) = if version == 1 {
        let _creation = reader.read_u64::<BigEndian>().map_err(truncated)?;
        let _modification = reader.read_u64::<BigEndian>().map_err(truncated)?;
        let timescale = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let duration = reader.read_u64::<BigEndian>().map_err(truncated)?;
        (timescale, duration, u64::MAX)
    } else {
        let _creation = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let _modification = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let timescale = reader.read_u32::<BigEndian>().map_err(truncated)?;
        let duration = u64::from(reader.read_u32::<BigEndian>().map_err(truncated)?);
        (timescale, duration, u64::from(u32::MAX))
    };
    debug!("mvhd: version={}, timescale={}, duration={}", version, timescale, duration);

    if timescale == 0 {
        return Err(MediaError::Probe("movie header has a zero timescale".into()));
    }
    if duration == unknown {
        return Err(MediaError::Probe("movie header does not declare a duration".into()));
    }
    let timescale = u64::from(timescale);
    let nanos = u128::from(duration % timescale) * 1_000_000_000 / u128::from(timescale);
    Ok(Duration::new(duration / timescale, nanos as u32))
}

fn find_mvhd<R: Read + Seek>(reader: &mut R, moov: &BoxHeader) -> Result<Duration, MediaError> {
    let end = moov.end_offset()?;
    reader.seek(SeekFrom::Start(moov.offset + moov.header_size))?;
    loop {
        if let Some(end) = end {
            if reader.stream_position()? >= end {
                break;
            }
        }
        let child = match read_box_header(reader)? {
            Some(child) => child,
            None => break,
        };
        if child.box_type == MVHD {
            return parse_mvhd(reader);
        }
        match child.end_offset()? {
            Some(next) => {
                reader.seek(SeekFrom::Start(next))?;
            }
            None => break,
        }
    }
    Err(MediaError::Probe("moov box has no movie header".into()))
}

/// Returns the movie duration declared in the file's `moov/mvhd` box.
///
/// Fails with `UnsupportedFormat` when the input does not look like an ISO
/// base media file, and with `Probe` when the header is missing or damaged.
/// For a partial download the error reads "no moov box" when the header lies
/// beyond what was fetched.
pub fn read_movie_duration<R: Read + Seek>(reader: &mut R) -> Result<Duration, MediaError> {
    let mut first = true;
    while let Some(header) = read_box_header(reader)? {
        if first && !LEADING_BOXES.contains(&header.box_type) {
            return Err(MediaError::UnsupportedFormat(format!(
                "leading box '{}' is not an ISO base media box",
                fourcc_to_string(header.box_type)
            )));
        }
        first = false;
        if header.box_type == MOOV {
            return find_mvhd(reader, &header);
        }
        match header.end_offset()? {
            Some(next) => {
                reader.seek(SeekFrom::Start(next))?;
            }
            None => break,
        }
    }
    if first {
        return Err(MediaError::UnsupportedFormat("empty input".into()));
    }
    Err(MediaError::Probe("no moov box".into()))
}
