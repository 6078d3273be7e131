//! Vendor microscopy metadata block: fixed-layout header (plane counts,
//! physical voxel size, frame interval) plus a nested "scan information"
//! record stream carrying rotation and per-channel wavelength ranges.

use std::io::{Read, Seek};

use tracing::{debug, warn};

use crate::tiff::decoder::TiffDecoder;
use crate::tiff::descriptor::{ChannelInfo, SliceDescriptor};
use crate::util::{Error, Result};

/// Accepted magic numbers at the head of the vendor block.
pub(crate) const VENDOR_MAGIC_V3: u32 = 0x0300_494c;
pub(crate) const VENDOR_MAGIC_V4: u32 = 0x0400_494c;

/// Record markers that open a nested container in the scan-information
/// stream. Each pushes one nesting level; [`BLOCK_END`] pops one.
const CONTAINER_MARKERS: [u32; 17] = [
    0x1000_0000,
    0x3000_0000,
    0x5000_0000,
    0x2000_0000,
    0x4000_0000,
    0x6000_0000,
    0x7000_0000,
    0x8000_0000,
    0x9000_0000,
    0xa000_0000,
    0xb000_0000,
    0xc000_0000,
    0xd000_0000,
    0x1100_0000,
    0x1200_0000,
    0x1300_0000,
    0x1400_0000,
];

const BLOCK_END: u32 = 0xffff_ffff;

const MARKER_ROTATION: u32 = 0x1000_0034;
const MARKER_WAVELENGTH_START: u32 = 0x7000_0022;
const MARKER_WAVELENGTH_END: u32 = 0x7000_0023;
const MARKER_ILLUMINATION: u32 = 0x9000_0003;
const MARKER_DYE_NAME: u32 = 0x7000_0026;

impl<R: Read + Seek> TiffDecoder<R> {
    /// Parses the vendor block at `offset`, restoring the stream position
    /// afterwards. A bad top-level magic number is fatal.
    ///
    /// The voxel-size doubles and the frame interval are little-endian
    /// regardless of the file's declared byte order; everything else
    /// follows the file.
    pub(crate) fn read_vendor_block(
        &mut self,
        offset: u64,
        fi: &mut SliceDescriptor,
    ) -> Result<()> {
        debug!("found vendor microscopy block");
        let save = self.pos()?;
        self.seek_to(offset)?;

        let magic = self.read_i32()? as u32;
        if magic != VENDOR_MAGIC_V3 && magic != VENDOR_MAGIC_V4 {
            return Err(Error::BadVendorMagic(magic));
        }
        for _ in 0..3 {
            self.read_i32()?;
        }
        let _n_slices = self.read_i32()?;
        let _n_channels = self.read_i32()?;
        let n_time_points = self.read_i32()?;
        self.meta.time_points = n_time_points.max(0) as usize;
        let _data_kind = self.read_i32()?;
        let _thumbnail_x = self.read_i32()?;
        let _thumbnail_y = self.read_i32()?;

        // Voxel size is stored in meters; calibration works in micrometers.
        fi.pixel_width = self.read_f64_le()? * 1.0e6;
        fi.pixel_height = self.read_f64_le()? * 1.0e6;
        fi.pixel_depth = self.read_f64_le()? * 1.0e6;

        // Origin doubles, unused here.
        for _ in 0..6 {
            self.read_i32()?;
        }

        let _scan_type = self.read_u16()?;
        let _spectral_scan = self.read_u16()?;
        let _data_kind_2 = self.read_i32()?;
        // Overlay, input/output LUT and channel color sub-block offsets.
        for _ in 0..4 {
            self.read_i32()?;
        }

        fi.frame_interval = self.read_f64_le()?;
        self.meta.frame_interval = fi.frame_interval;

        let _channel_data_kinds = self.read_i32()?;
        let scan_information = self.read_i32()?;
        if scan_information > 0 {
            self.read_scan_information(scan_information as u64, fi)?;
        }

        self.seek_to(save)?;
        Ok(())
    }

    fn read_scan_information(&mut self, offset: u64, fi: &mut SliceDescriptor) -> Result<()> {
        self.seek_to(offset)?;

        let mut depth = 0i32;
        let mut found_rotation = false;
        let mut channels: Vec<ChannelInfo> = Vec::new();

        loop {
            let entry = self.read_i32()? as u32;
            if entry == BLOCK_END {
                depth -= 1;
            } else if CONTAINER_MARKERS.contains(&entry) {
                depth += 1;
            }
            if depth == 0 {
                break;
            }

            let _record_kind = self.read_i32()?;
            let size = self.read_i32()? as i64;

            match entry {
                MARKER_ROTATION => {
                    found_rotation = true;
                    let rotation = self.read_f64()?;
                    fi.rotation = Some(rotation);
                    self.meta.rotation = Some(rotation);
                    self.skip(size - 8)?;
                }
                MARKER_WAVELENGTH_START => {
                    let start = self.read_f64()?;
                    debug!(wavelength = start, "detection wavelength start");
                    channels.push(ChannelInfo {
                        detection_start: start,
                        detection_end: 0.0,
                    });
                    self.skip(size - 8)?;
                }
                MARKER_WAVELENGTH_END => {
                    let end = self.read_f64()?;
                    debug!(wavelength = end, "detection wavelength end");
                    let last = channels
                        .last_mut()
                        .ok_or_else(|| Error::invalid("wavelength end record without a start"))?;
                    last.detection_end = end;
                    self.skip(size - 8)?;
                }
                MARKER_ILLUMINATION => {
                    let wavelength = self.read_f64()?;
                    debug!(wavelength, "illumination wavelength");
                    self.skip(size - 8)?;
                }
                MARKER_DYE_NAME => {
                    let (dye, consumed) = self.read_nul_terminated()?;
                    debug!(dye = %dye, "dye name");
                    self.skip(size - consumed)?;
                }
                _ => self.skip(size)?,
            }
        }

        if !channels.is_empty() {
            self.meta.channel_info = channels;
        }
        if !found_rotation {
            warn!("no rotation record in vendor scan information");
        }
        Ok(())
    }

    /// Reads bytes through the terminating NUL; returns the string and the
    /// number of bytes consumed.
    fn read_nul_terminated(&mut self) -> Result<(String, i64)> {
        let mut bytes = Vec::new();
        loop {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            bytes.push(b);
        }
        let consumed = bytes.len() as i64 + 1;
        Ok((String::from_utf8_lossy(&bytes).into_owned(), consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiff::format;
    use std::io::Cursor;

    fn entry(tag: u16, field_type: u16, count: u32, value: u32) -> Vec<u8> {
        let mut e = Vec::with_capacity(12);
        e.extend_from_slice(&tag.to_le_bytes());
        e.extend_from_slice(&field_type.to_le_bytes());
        e.extend_from_slice(&count.to_le_bytes());
        e.extend_from_slice(&value.to_le_bytes());
        e
    }

    /// Classic little-endian file whose single directory points at a
    /// vendor block at `block_offset`.
    fn vendor_file(block: &[u8], block_offset: u32) -> Vec<u8> {
        let entries = [
            entry(format::IMAGE_WIDTH, format::FIELD_SHORT, 1, 32),
            entry(format::IMAGE_LENGTH, format::FIELD_SHORT, 1, 32),
            entry(format::BITS_PER_SAMPLE, format::FIELD_SHORT, 1, 8),
            entry(format::STRIP_OFFSETS, format::FIELD_LONG, 1, 8192),
            entry(format::VENDOR_INFO, format::FIELD_LONG, 1, block_offset),
        ];
        let mut f = Vec::new();
        f.extend_from_slice(b"II");
        f.extend_from_slice(&42u16.to_le_bytes());
        f.extend_from_slice(&8u32.to_le_bytes());
        f.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for e in &entries {
            f.extend_from_slice(e);
        }
        f.extend_from_slice(&0u32.to_le_bytes());
        while f.len() < block_offset as usize {
            f.push(0);
        }
        f.extend_from_slice(block);
        f
    }

    fn vendor_block(scan_info_offset: u32) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(&VENDOR_MAGIC_V4.to_le_bytes());
        for _ in 0..3 {
            b.extend_from_slice(&0u32.to_le_bytes());
        }
        b.extend_from_slice(&10u32.to_le_bytes()); // slices
        b.extend_from_slice(&2u32.to_le_bytes()); // channels
        b.extend_from_slice(&3u32.to_le_bytes()); // time points
        b.extend_from_slice(&0u32.to_le_bytes()); // data kind
        b.extend_from_slice(&128u32.to_le_bytes()); // thumbnail x
        b.extend_from_slice(&128u32.to_le_bytes()); // thumbnail y
        b.extend_from_slice(&0.25e-6f64.to_le_bytes());
        b.extend_from_slice(&0.25e-6f64.to_le_bytes());
        b.extend_from_slice(&1.0e-6f64.to_le_bytes());
        for _ in 0..6 {
            b.extend_from_slice(&0u32.to_le_bytes());
        }
        b.extend_from_slice(&0u16.to_le_bytes()); // scan type
        b.extend_from_slice(&0u16.to_le_bytes()); // spectral scan
        b.extend_from_slice(&0u32.to_le_bytes()); // data kind
        for _ in 0..4 {
            b.extend_from_slice(&0u32.to_le_bytes());
        }
        b.extend_from_slice(&2.5f64.to_le_bytes()); // frame interval
        b.extend_from_slice(&0u32.to_le_bytes()); // channel data kinds
        b.extend_from_slice(&scan_info_offset.to_le_bytes());
        b
    }

    fn scan_information() -> Vec<u8> {
        let mut s = Vec::new();
        let mut record = |marker: u32, size: u32, payload: &[u8]| {
            s.extend_from_slice(&marker.to_le_bytes());
            s.extend_from_slice(&0u32.to_le_bytes());
            s.extend_from_slice(&size.to_le_bytes());
            s.extend_from_slice(payload);
        };
        record(0x1000_0000, 0, &[]); // recording container
        record(MARKER_ROTATION, 8, &90.0f64.to_le_bytes());
        record(MARKER_WAVELENGTH_START, 8, &488.0f64.to_le_bytes());
        record(MARKER_WAVELENGTH_END, 8, &520.0f64.to_le_bytes());
        record(0x0001_2345, 4, &[1, 2, 3, 4]); // unknown, skipped by size
        s.extend_from_slice(&BLOCK_END.to_le_bytes());
        s
    }

    #[test]
    fn test_vendor_block_extraction() {
        let block_offset = 512u32;
        let scan_offset = 1024u32;
        let block = vendor_block(scan_offset);
        let mut f = vendor_file(&block, block_offset);
        while f.len() < scan_offset as usize {
            f.push(0);
        }
        f.extend_from_slice(&scan_information());

        let decoded = crate::tiff::decoder::TiffDecoder::new(Cursor::new(f))
            .decode()
            .unwrap();
        let fi = &decoded.slices[0];
        assert!((fi.pixel_width - 0.25).abs() < 1e-9);
        assert!((fi.pixel_depth - 1.0).abs() < 1e-9);
        assert_eq!(fi.rotation, Some(90.0));
        assert_eq!(fi.frame_interval, 2.5);
        assert!(decoded.meta.vendor);
        assert_eq!(decoded.meta.time_points, 3);
        assert_eq!(decoded.meta.channel_info.len(), 1);
        assert_eq!(decoded.meta.channel_info[0].detection_start, 488.0);
        assert_eq!(decoded.meta.channel_info[0].detection_end, 520.0);
    }

    #[test]
    fn test_bad_vendor_magic_is_fatal() {
        let block_offset = 512u32;
        let mut block = vendor_block(0);
        block[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        let f = vendor_file(&block, block_offset);
        let err = crate::tiff::decoder::TiffDecoder::new(Cursor::new(f))
            .decode()
            .unwrap_err();
        assert!(matches!(err, Error::BadVendorMagic(0xdead_beef)));
    }

    #[test]
    fn test_wavelength_end_without_start_rejected() {
        let block_offset = 512u32;
        let scan_offset = 1024u32;
        let block = vendor_block(scan_offset);
        let mut f = vendor_file(&block, block_offset);
        while f.len() < scan_offset as usize {
            f.push(0);
        }
        let mut s = Vec::new();
        s.extend_from_slice(&0x1000_0000u32.to_le_bytes());
        s.extend_from_slice(&0u32.to_le_bytes());
        s.extend_from_slice(&0u32.to_le_bytes());
        s.extend_from_slice(&MARKER_WAVELENGTH_END.to_le_bytes());
        s.extend_from_slice(&0u32.to_le_bytes());
        s.extend_from_slice(&8u32.to_le_bytes());
        s.extend_from_slice(&520.0f64.to_le_bytes());
        s.extend_from_slice(&BLOCK_END.to_le_bytes());
        f.extend_from_slice(&s);

        let err = crate::tiff::decoder::TiffDecoder::new(Cursor::new(f))
            .decode()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStructure(_)));
    }
}
