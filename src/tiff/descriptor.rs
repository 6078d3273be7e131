//! Per-plane slice descriptors, file-level metadata, and the stateful
//! offset-wraparound accumulator used while resolving strip offsets.

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::tiff::format::{Compression, PixelKind};
use crate::util::{Error, Result};

/// Raw strip offsets/lengths as read from a directory, before resolution.
pub type StripArray = SmallVec<[i64; 4]>;

/// Describes one 2D pixel plane of the stack.
///
/// After decoding, `offset` is the final absolute byte position of the
/// plane's first pixel (or -1 on the write path until the plane is flushed).
/// Strip arrays are only kept transiently; resolution collapses them.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceDescriptor {
    pub width: usize,
    pub height: usize,
    pub pixel_kind: PixelKind,
    pub compression: Compression,
    /// Absolute byte offset of the first pixel; -1 while unresolved.
    pub offset: i64,
    pub strip_offsets: StripArray,
    pub strip_lengths: StripArray,
    pub samples_per_pixel: u32,
    pub rows_per_strip: u32,
    /// Plane count pre-seed from an `images=` description field, or the
    /// vendor header. 0 means "walk every directory".
    pub n_planes: usize,
    /// Byte gap between consecutive planes when synthesizing offsets.
    pub gap_between_planes: i64,
    pub is_thumbnail: bool,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub pixel_depth: f64,
    pub unit: Option<String>,
    pub frame_interval: f64,
    pub rotation: Option<f64>,
    pub description: Option<String>,
}

impl SliceDescriptor {
    pub fn new(width: usize, height: usize, pixel_kind: PixelKind) -> Self {
        Self {
            width,
            height,
            pixel_kind,
            compression: Compression::None,
            offset: -1,
            strip_offsets: SmallVec::new(),
            strip_lengths: SmallVec::new(),
            samples_per_pixel: 1,
            rows_per_strip: 0,
            n_planes: 0,
            gap_between_planes: 0,
            is_thumbnail: false,
            pixel_width: 1.0,
            pixel_height: 1.0,
            pixel_depth: 1.0,
            unit: None,
            frame_interval: 0.0,
            rotation: None,
            description: None,
        }
    }

    /// Byte size of one decoded plane.
    pub fn plane_bytes(&self) -> usize {
        self.width * self.height * self.pixel_kind.bytes_per_pixel()
    }
}

/// A decoded (or to-be-written) pixel plane in its native sample type.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelBuffer {
    /// Number of samples in the buffer.
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::F32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serialized size in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len() * 2,
            Self::F32(v) => v.len() * 4,
        }
    }
}

/// Color lookup table: three 256-entry channels.
#[derive(Clone, PartialEq, Eq)]
pub struct Palette {
    pub reds: [u8; 256],
    pub greens: [u8; 256],
    pub blues: [u8; 256],
}

impl std::fmt::Debug for Palette {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Palette").finish_non_exhaustive()
    }
}

/// Per-channel detection wavelength range from the vendor metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelInfo {
    pub detection_start: f64,
    pub detection_end: f64,
}

/// Physical calibration supplied by the caller when opening for write.
#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub pixel_depth: f64,
    pub unit: Option<String>,
    pub frame_interval: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            pixel_width: 1.0,
            pixel_height: 1.0,
            pixel_depth: 1.0,
            unit: None,
            frame_interval: 0.0,
        }
    }
}

/// File-scoped state accumulated during the directory walk.
#[derive(Debug, Clone, Default)]
pub struct FileMetadata {
    pub little_endian: bool,
    /// True for the 64-bit-offset (wide) format.
    pub wide: bool,
    pub palette: Option<Palette>,
    /// Free-text blocks keyed by tag name (Software, DateTime, ...).
    pub free_text: BTreeMap<String, String>,
    /// True once the vendor microscopy block was observed.
    pub vendor: bool,
    /// True once any resolved offset crossed 2^31; disables synthesis.
    pub seen_large_offset: bool,
    pub channel_info: Vec<ChannelInfo>,
    /// Acquisition source path recorded in a structured description.
    pub original_file: Option<String>,
    pub rotation: Option<f64>,
    pub time_points: usize,
    pub frame_interval: f64,
    // Typed metadata side channel.
    pub info: Option<String>,
    pub slice_labels: Vec<String>,
    pub display_ranges: Vec<f64>,
    pub channel_luts: Vec<Vec<u8>>,
    pub roi: Option<Vec<u8>>,
    pub overlays: Vec<Vec<u8>>,
    /// Pass-through chunks for unrecognized low-valued type ids.
    pub extra_metadata: BTreeMap<u32, Vec<Vec<u8>>>,
}

/// Threshold for detecting that a 32-bit offset field wrapped: a strip
/// offset more than this far *below* its predecessor cannot be a real
/// backward seek in a sequentially written file.
const BACKWARD_JUMP: i64 = 1_000_000_000;

/// Stateful correction for 32-bit strip offsets that wrapped in files
/// larger than 4 GiB (vendor flavor only).
///
/// Order-dependent: must be fed each directory's strip offsets exactly
/// once, in parse order.
#[derive(Debug, Clone, Default)]
pub struct OffsetUnwrap {
    last_raw_offset: i64,
    seen_large_offset: bool,
    base: i64,
}

impl OffsetUnwrap {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once any resolved offset exceeded 2^31.
    pub fn seen_large_offset(&self) -> bool {
        self.seen_large_offset
    }

    /// Resolves one directory's raw strip offsets into the plane's final
    /// absolute offset, updating the wraparound state.
    ///
    /// The first strip is authoritative, except that an out-of-order strip
    /// layout (last strip before the first) yields the last strip instead.
    pub fn resolve(&mut self, vendor: bool, strips: &mut StripArray) -> Result<i64> {
        let first_raw = *strips
            .first()
            .ok_or_else(|| Error::invalid("empty strip offset array"))?;

        if self.seen_large_offset && vendor && first_raw + BACKWARD_JUMP < self.last_raw_offset {
            // The true offset crossed a 4 GiB boundary and the 32-bit
            // field wrapped; everything from here on needs the next base.
            self.base += 1i64 << 32;
            tracing::debug!(base = self.base, "strip offset wrapped, bumping base");
        }
        self.last_raw_offset = first_raw;

        if vendor {
            for s in strips.iter_mut() {
                *s += self.base;
            }
        }

        let mut offset = strips[0];
        if strips.len() > 1 && strips[strips.len() - 1] < strips[0] {
            offset = strips[strips.len() - 1];
        }
        if offset < 0 {
            return Err(Error::NegativeOffset);
        }
        if offset > (1i64 << 31) {
            self.seen_large_offset = true;
        }
        Ok(offset)
    }
}

/// How the ordered slice table was obtained.
///
/// `Synthesized` covers the uniform-stride shortcut: a single directory
/// declaring N planes yields N descriptors at `offset + i * stride`
/// without walking N directories.
#[derive(Debug, Clone)]
pub enum SliceTable {
    Decoded(Vec<SliceDescriptor>),
    Synthesized {
        proto: Box<SliceDescriptor>,
        count: usize,
        stride: i64,
    },
}

impl SliceTable {
    pub fn len(&self) -> usize {
        match self {
            Self::Decoded(v) => v.len(),
            Self::Synthesized { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flattens into one descriptor per plane, resolving synthesized
    /// offsets to their final absolute positions.
    pub fn materialize(self) -> Vec<SliceDescriptor> {
        match self {
            Self::Decoded(v) => v,
            Self::Synthesized { proto, count, stride } => {
                let mut out = Vec::with_capacity(count);
                for i in 0..count {
                    let mut d = (*proto).clone();
                    d.offset = proto.offset + i as i64 * stride;
                    out.push(d);
                }
                out
            }
        }
    }
}
