//! Write-path serialization: output stream with tracked position, and the
//! header + single-directory layout used for freshly written stacks.
//!
//! New files carry one directory describing the first plane; the plane
//! count lives in the description block and the remaining planes follow
//! contiguously, which is exactly the shape the read path's uniform-stride
//! synthesis reconstructs.

use std::fs::OpenOptions;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use crate::tiff::descriptor::Calibration;
use crate::tiff::format::{self, PixelKind};
use crate::util::{Error, Result};

pub(crate) trait WriteSeek: Write + Seek + Send {}
impl<T: Write + Seek + Send> WriteSeek for T {}

/// Buffered output stream writing in a fixed byte order.
pub struct OStream {
    writer: Box<dyn WriteSeek>,
    pos: u64,
    little_endian: bool,
}

impl OStream {
    /// Create a new output stream for the given file path.
    pub fn create(path: impl AsRef<Path>, little_endian: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            writer: Box::new(BufWriter::with_capacity(2 * 1024 * 1024, file)),
            pos: 0,
            little_endian,
        })
    }

    /// Wrap an arbitrary sink; used by tests to inject write failures.
    pub(crate) fn from_writer(
        writer: impl Write + Seek + Send + 'static,
        little_endian: bool,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            pos: 0,
            little_endian,
        }
    }

    /// Get the current write position.
    #[inline]
    pub fn pos(&self) -> u64 {
        self.pos
    }

    #[inline]
    pub fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    /// Write bytes and advance position.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.pos += data.len() as u64;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        if self.little_endian {
            self.writer.write_u16::<LittleEndian>(value)?;
        } else {
            self.writer.write_u16::<BigEndian>(value)?;
        }
        self.pos += 2;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        if self.little_endian {
            self.writer.write_u32::<LittleEndian>(value)?;
        } else {
            self.writer.write_u32::<BigEndian>(value)?;
        }
        self.pos += 4;
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> Result<()> {
        self.write_u32(value as u32)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        if self.little_endian {
            self.writer.write_u64::<LittleEndian>(value)?;
        } else {
            self.writer.write_u64::<BigEndian>(value)?;
        }
        self.pos += 8;
        Ok(())
    }

    /// Seek to a position and return the new position.
    pub fn seek(&mut self, pos: u64) -> Result<u64> {
        self.writer.flush()?;
        let new_pos = self.writer.seek(SeekFrom::Start(pos))?;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Seek to end and return the position.
    pub fn seek_end(&mut self) -> Result<u64> {
        self.writer.flush()?;
        let new_pos = self.writer.seek(SeekFrom::End(0))?;
        self.pos = new_pos;
        Ok(new_pos)
    }

    /// Flush the buffer to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Byte positions fixed by the header writer, needed later to patch the
/// description in place and to derive plane offsets.
#[derive(Debug, Clone, Copy)]
pub struct StackLayout {
    /// Absolute offset of the first pixel of plane 0; plane `i` starts at
    /// `data_start + i * plane_bytes`.
    pub data_start: u64,
    pub description_offset: u64,
    pub description_len: usize,
    pub plane_bytes: u64,
}

const N_ENTRIES: u64 = 14;

/// Writes the container header, the single directory, and the indirect
/// fields (description, resolution rationals). Leaves the stream at
/// `data_start`, ready for the first plane.
pub fn write_header(
    out: &mut OStream,
    wide: bool,
    width: u32,
    height: u32,
    pixel_kind: PixelKind,
    description: &str,
    cal: &Calibration,
) -> Result<()> {
    let layout = plan_layout(wide, width, height, pixel_kind, description)?;

    // File header.
    if out.is_little_endian() {
        out.write_bytes(b"II")?;
    } else {
        out.write_bytes(b"MM")?;
    }
    if wide {
        out.write_u16(format::VERSION_WIDE)?;
        out.write_u16(8)?;
        out.write_u16(0)?;
        out.write_u64(16)?;
        out.write_u64(N_ENTRIES)?;
    } else {
        out.write_u16(format::VERSION_CLASSIC)?;
        out.write_u32(8)?;
        out.write_u16(N_ENTRIES as u16)?;
    }

    let desc_len = description.len() as u64;
    let x_res_offset = layout.description_offset + desc_len;
    let y_res_offset = x_res_offset + 8;
    let sample_format = match pixel_kind {
        PixelKind::F32 | PixelKind::F64 => format::SAMPLE_FORMAT_FLOAT,
        PixelKind::I16 | PixelKind::I32 => format::SAMPLE_FORMAT_SIGNED,
        _ => format::SAMPLE_FORMAT_UNSIGNED,
    };

    // Directory entries, in ascending tag order.
    write_entry(out, wide, format::IMAGE_WIDTH, format::FIELD_LONG, 1, width as u64)?;
    write_entry(out, wide, format::IMAGE_LENGTH, format::FIELD_LONG, 1, height as u64)?;
    write_entry(
        out,
        wide,
        format::BITS_PER_SAMPLE,
        format::FIELD_SHORT,
        1,
        pixel_kind.bits_per_sample() as u64,
    )?;
    write_entry(out, wide, format::COMPRESSION, format::FIELD_SHORT, 1, 1)?;
    write_entry(out, wide, format::PHOTO_INTERP, format::FIELD_SHORT, 1, 1)?;
    write_entry(
        out,
        wide,
        format::IMAGE_DESCRIPTION,
        format::FIELD_ASCII,
        desc_len,
        layout.description_offset,
    )?;
    write_entry(
        out,
        wide,
        format::STRIP_OFFSETS,
        format::FIELD_LONG,
        1,
        layout.data_start,
    )?;
    write_entry(
        out,
        wide,
        format::SAMPLES_PER_PIXEL,
        format::FIELD_SHORT,
        1,
        pixel_kind.samples_per_pixel() as u64,
    )?;
    write_entry(out, wide, format::ROWS_PER_STRIP, format::FIELD_LONG, 1, height as u64)?;
    write_entry(
        out,
        wide,
        format::STRIP_BYTE_COUNTS,
        format::FIELD_LONG,
        1,
        layout.plane_bytes,
    )?;
    write_entry(
        out,
        wide,
        format::X_RESOLUTION,
        format::FIELD_RATIONAL,
        1,
        x_res_offset,
    )?;
    write_entry(
        out,
        wide,
        format::Y_RESOLUTION,
        format::FIELD_RATIONAL,
        1,
        y_res_offset,
    )?;
    write_entry(out, wide, format::RESOLUTION_UNIT, format::FIELD_SHORT, 1, 1)?;
    write_entry(
        out,
        wide,
        format::SAMPLE_FORMAT,
        format::FIELD_SHORT,
        1,
        sample_format as u64,
    )?;

    // Next-directory pointer: none.
    if wide {
        out.write_u64(0)?;
    } else {
        out.write_u32(0)?;
    }

    debug_assert_eq!(out.pos(), layout.description_offset);
    out.write_bytes(description.as_bytes())?;
    write_resolution(out, cal.pixel_width)?;
    write_resolution(out, cal.pixel_height)?;
    debug_assert_eq!(out.pos(), layout.data_start);
    Ok(())
}

/// Computes the fixed layout without writing anything.
pub fn plan_layout(
    wide: bool,
    width: u32,
    height: u32,
    pixel_kind: PixelKind,
    description: &str,
) -> Result<StackLayout> {
    if width == 0 || height == 0 {
        return Err(Error::invalid("zero image dimensions"));
    }
    let description_offset = if wide {
        16 + 8 + N_ENTRIES * format::ENTRY_SIZE_WIDE + 8
    } else {
        8 + 2 + N_ENTRIES * format::ENTRY_SIZE_CLASSIC + 4
    };
    let data_start = description_offset + description.len() as u64 + 16;
    Ok(StackLayout {
        data_start,
        description_offset,
        description_len: description.len(),
        plane_bytes: width as u64 * height as u64 * pixel_kind.bytes_per_pixel() as u64,
    })
}

fn write_entry(
    out: &mut OStream,
    wide: bool,
    tag: u16,
    field_type: u16,
    count: u64,
    value: u64,
) -> Result<()> {
    out.write_u16(tag)?;
    out.write_u16(field_type)?;
    if wide {
        out.write_u64(count)?;
        if field_type == format::FIELD_SHORT && count == 1 {
            out.write_u16(value as u16)?;
            out.write_u16(0)?;
            out.write_u32(0)?;
        } else {
            out.write_u64(value)?;
        }
    } else {
        out.write_u32(count as u32)?;
        if field_type == format::FIELD_SHORT && count == 1 {
            out.write_u16(value as u16)?;
            out.write_u16(0)?;
        } else {
            out.write_u32(value as u32)?;
        }
    }
    Ok(())
}

/// Resolution is pixels-per-unit as an integer rational over a 10^6
/// denominator, the representation the read side's rational path expects.
fn write_resolution(out: &mut OStream, pixel_size: f64) -> Result<()> {
    let denominator = 1_000_000i32;
    let numerator = if pixel_size != 0.0 {
        (denominator as f64 / pixel_size).round() as i32
    } else {
        0
    };
    out.write_i32(numerator)?;
    out.write_i32(denominator)?;
    Ok(())
}
