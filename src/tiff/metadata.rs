//! Free-text description block (`key=value` lines, NUL-terminated) and the
//! typed metadata side channel: a magic-prefixed header enumerating
//! `(type, count)` pairs followed by payload chunks whose byte lengths come
//! from a separate tag.

use std::io::{Read, Seek};

use tracing::debug;

use crate::tiff::decoder::TiffDecoder;
use crate::tiff::descriptor::{Calibration, ChannelInfo, FileMetadata, SliceDescriptor};
use crate::tiff::format::{self, PixelKind};
use crate::util::{Error, Result};

/// Version line our description blocks open with. Kept stable so the
/// block is recognized by other readers of the convention.
const DESCRIPTION_HEADER: &str = "ImageJ=1.52\n";

/// Records a first-directory description on the descriptor and pre-seeds
/// the plane count from an embedded `images=` field. Descriptions not
/// following the convention are captured as free text instead.
pub(crate) fn apply_image_description(
    id: &str,
    fi: &mut SliceDescriptor,
    meta: &mut FileMetadata,
) {
    if !id.starts_with("ImageJ") {
        meta.free_text
            .insert("ImageDescription".to_owned(), id.to_owned());
    }
    if id.len() < 7 {
        return;
    }
    fi.description = Some(id.to_owned());
    if let Some(n) = embedded_plane_count(id) {
        if n > 1 {
            fi.n_planes = n;
        }
    }
}

/// The `images=` field is only honored past the start of the block, so a
/// block that is nothing but a count is ignored.
fn embedded_plane_count(id: &str) -> Option<usize> {
    let index1 = id.find("images=")?;
    if index1 == 0 {
        return None;
    }
    let rest = &id[index1 + 7..];
    let index2 = rest.find('\n')?;
    let n = rest[..index2].trim().parse::<f64>().unwrap_or(0.0);
    Some(n as usize)
}

/// Parsed form of a structured description block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptionProperties {
    pub images: Option<usize>,
    pub channels: Option<usize>,
    pub slices: Option<usize>,
    pub spacing: Option<f64>,
    pub unit: Option<String>,
    pub frame_interval: Option<f64>,
    pub original_file: Option<String>,
    /// Flattened detection wavelengths, two per channel.
    pub detections: Vec<i32>,
}

/// Parses one `key=value` pair per line, ignoring anything malformed.
pub fn parse_description(text: &str) -> DescriptionProperties {
    let mut props = DescriptionProperties::default();
    let mut detections: Vec<(usize, i32)> = Vec::new();
    for line in text.trim_end_matches('\0').lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "images" => props.images = value.trim().parse().ok(),
            "channels" => props.channels = value.trim().parse().ok(),
            "slices" => props.slices = value.trim().parse().ok(),
            "spacing" => props.spacing = value.trim().parse().ok(),
            "unit" => props.unit = Some(value.to_owned()),
            "finterval" => props.frame_interval = value.trim().parse().ok(),
            "originalFile" => props.original_file = Some(value.to_owned()),
            _ => {
                if let Some(suffix) = key.strip_prefix("detection") {
                    if let (Ok(index), Ok(wavelength)) =
                        (suffix.parse::<usize>(), value.trim().parse::<i32>())
                    {
                        detections.push((index, wavelength));
                    }
                }
            }
        }
    }
    detections.sort_by_key(|&(i, _)| i);
    props.detections = detections.into_iter().map(|(_, w)| w).collect();
    props
}

/// Builds the description block written into new files.
///
/// The `images=` and `slices=` fields use a fixed nine-digit width so an
/// early-close rewrite of the plane count never changes the block length.
pub(crate) fn build_description(
    n_images: usize,
    slices: usize,
    channels: usize,
    pixel_kind: PixelKind,
    cal: &Calibration,
    original_file: Option<&str>,
    channel_info: &[ChannelInfo],
) -> String {
    use std::fmt::Write;

    let mut s = String::with_capacity(128);
    s.push_str(DESCRIPTION_HEADER);
    if n_images > 1 && pixel_kind != PixelKind::Rgb48 {
        let _ = writeln!(s, "images={n_images:09}");
    }
    if channels > 1 {
        let _ = writeln!(s, "channels={channels}");
    }
    if slices > 1 {
        let _ = writeln!(s, "slices={slices:09}");
    }
    s.push_str("hyperstack=false\n");
    if let Some(unit) = &cal.unit {
        let unit = if unit == "\u{00b5}m" { "um" } else { unit };
        let _ = writeln!(s, "unit={unit}");
    }
    if cal.frame_interval != 0.0 {
        if cal.frame_interval.fract() == 0.0 {
            let _ = writeln!(s, "finterval={}", cal.frame_interval as i64);
        } else {
            let _ = writeln!(s, "finterval={}", cal.frame_interval);
        }
    }
    if n_images > 1 {
        if cal.pixel_depth != 0.0 && cal.pixel_depth != 1.0 {
            let _ = writeln!(s, "spacing={}", cal.pixel_depth);
        }
        s.push_str("loop=false\n");
    }
    if let Some(path) = original_file {
        let _ = writeln!(s, "originalFile={path}");
        let mut index = 0usize;
        for info in channel_info {
            let _ = writeln!(s, "detection{index}={}", info.detection_start as i32);
            index += 1;
            let _ = writeln!(s, "detection{index}={}", info.detection_end as i32);
            index += 1;
        }
    }
    s.push('\0');
    s
}

impl<R: Read + Seek> TiffDecoder<R> {
    /// Walks the typed side channel at `loc`, dispatching each chunk run
    /// to its handler. A header size outside the sane window or a missing
    /// magic number silently skips the whole block; the chunks may simply
    /// belong to a different writer.
    pub(crate) fn read_meta_chunks(&mut self, loc: u64) -> Result<()> {
        if self.meta_chunk_lengths.is_empty() {
            return Ok(());
        }
        let save = self.pos()?;
        self.seek_to(loc)?;

        let hdr_size = self.meta_chunk_lengths[0];
        if !(12..=804).contains(&hdr_size) {
            self.seek_to(save)?;
            return Ok(());
        }
        let magic = self.read_i32()? as u32;
        if magic != format::META_MAGIC {
            self.seek_to(save)?;
            return Ok(());
        }
        debug!("typed metadata side channel present");

        let n_types = ((hdr_size - 4) / 8) as usize;
        let mut kinds = Vec::with_capacity(n_types);
        let mut counts = Vec::with_capacity(n_types);
        for _ in 0..n_types {
            kinds.push(self.read_i32()? as u32);
            counts.push(self.read_i32()?.max(0) as usize);
        }

        let mut start = 1usize;
        for (kind, count) in kinds.into_iter().zip(counts) {
            if count == 0 {
                continue;
            }
            match kind {
                format::META_INFO => self.read_info_text(start)?,
                format::META_LABELS => self.read_slice_labels(start, start + count - 1)?,
                format::META_RANGES => self.read_display_ranges(start)?,
                format::META_LUTS => self.read_channel_luts(start, start + count - 1)?,
                format::META_ROI => self.read_roi(start)?,
                format::META_OVERLAY => self.read_overlays(start, start + count - 1)?,
                k if k < 0xffffff => self.read_passthrough(k, start, count)?,
                _ => self.skip_chunks(start, start + count - 1)?,
            }
            start += count;
        }

        self.seek_to(save)?;
        Ok(())
    }

    fn chunk_len(&self, index: usize) -> Result<usize> {
        self.meta_chunk_lengths
            .get(index)
            .map(|&len| len.max(0) as usize)
            .ok_or_else(|| Error::invalid("metadata chunk index out of range"))
    }

    fn read_chunk(&mut self, index: usize) -> Result<Vec<u8>> {
        let len = self.chunk_len(index)?;
        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Text chunks hold 16-bit code units in the file's byte order.
    fn utf16_chunk(&self, bytes: &[u8]) -> String {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| {
                if self.is_little_endian() {
                    u16::from_le_bytes([pair[0], pair[1]])
                } else {
                    u16::from_be_bytes([pair[0], pair[1]])
                }
            })
            .collect();
        String::from_utf16_lossy(&units)
    }

    fn read_info_text(&mut self, first: usize) -> Result<()> {
        let bytes = self.read_chunk(first)?;
        self.meta.info = Some(self.utf16_chunk(&bytes));
        Ok(())
    }

    fn read_slice_labels(&mut self, first: usize, last: usize) -> Result<()> {
        for i in first..=last {
            let bytes = self.read_chunk(i)?;
            let label = self.utf16_chunk(&bytes);
            self.meta.slice_labels.push(label);
        }
        Ok(())
    }

    fn read_display_ranges(&mut self, first: usize) -> Result<()> {
        let n = self.chunk_len(first)? / 8;
        for _ in 0..n {
            let range = self.read_f64()?;
            self.meta.display_ranges.push(range);
        }
        Ok(())
    }

    fn read_channel_luts(&mut self, first: usize, last: usize) -> Result<()> {
        for i in first..=last {
            let lut = self.read_chunk(i)?;
            self.meta.channel_luts.push(lut);
        }
        Ok(())
    }

    fn read_roi(&mut self, first: usize) -> Result<()> {
        self.meta.roi = Some(self.read_chunk(first)?);
        Ok(())
    }

    fn read_overlays(&mut self, first: usize, last: usize) -> Result<()> {
        for i in first..=last {
            let overlay = self.read_chunk(i)?;
            self.meta.overlays.push(overlay);
        }
        Ok(())
    }

    fn read_passthrough(&mut self, kind: u32, first: usize, count: usize) -> Result<()> {
        for i in first..first + count {
            let chunk = self.read_chunk(i)?;
            self.meta.extra_metadata.entry(kind).or_default().push(chunk);
        }
        Ok(())
    }

    fn skip_chunks(&mut self, first: usize, last: usize) -> Result<()> {
        for i in first..=last {
            let len = self.chunk_len(i)?;
            self.skip(len as i64)?;
        }
        Ok(())
    }
}
