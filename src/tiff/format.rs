//! Container format constants: tag numbers, markers, pixel kinds.

/// Little-endian byte-order marker ("II").
pub const MARKER_LITTLE_ENDIAN: u16 = 0x4949;

/// Big-endian byte-order marker ("MM").
pub const MARKER_BIG_ENDIAN: u16 = 0x4d4d;

/// Version marker for the classic (32-bit offset) format.
pub const VERSION_CLASSIC: u16 = 42;

/// Version marker for the wide (64-bit offset) format.
pub const VERSION_WIDE: u16 = 43;

/// Directory entry width in bytes, classic format.
pub const ENTRY_SIZE_CLASSIC: u64 = 12;

/// Directory entry width in bytes, wide format.
pub const ENTRY_SIZE_WIDE: u64 = 20;

/// Directories declaring more entries than this are rejected as corrupt.
pub const MAX_DIRECTORY_ENTRIES: u64 = 1000;

// Tags.
pub const NEW_SUBFILE_TYPE: u16 = 254;
pub const IMAGE_WIDTH: u16 = 256;
pub const IMAGE_LENGTH: u16 = 257;
pub const BITS_PER_SAMPLE: u16 = 258;
pub const COMPRESSION: u16 = 259;
pub const PHOTO_INTERP: u16 = 262;
pub const IMAGE_DESCRIPTION: u16 = 270;
pub const STRIP_OFFSETS: u16 = 273;
pub const ORIENTATION: u16 = 274;
pub const SAMPLES_PER_PIXEL: u16 = 277;
pub const ROWS_PER_STRIP: u16 = 278;
pub const STRIP_BYTE_COUNTS: u16 = 279;
pub const X_RESOLUTION: u16 = 282;
pub const Y_RESOLUTION: u16 = 283;
pub const PLANAR_CONFIGURATION: u16 = 284;
pub const RESOLUTION_UNIT: u16 = 296;
pub const SOFTWARE: u16 = 305;
pub const DATE_TIME: u16 = 306;
pub const ARTIST: u16 = 315;
pub const HOST_COMPUTER: u16 = 316;
pub const PREDICTOR: u16 = 317;
pub const COLOR_MAP: u16 = 320;
pub const SAMPLE_FORMAT: u16 = 339;
/// Legacy NIH Image calibration header (only honored when count == 256).
pub const NIH_IMAGE_HDR: u16 = 43314;
/// Private tag registered with Adobe: per-chunk byte lengths for [`META_DATA`].
pub const META_DATA_BYTE_COUNTS: u16 = 50838;
/// Private tag registered with Adobe: typed metadata side channel.
pub const META_DATA: u16 = 50839;
/// Vendor microscopy metadata block (LSM flavor).
pub const VENDOR_INFO: u16 = 34412;

// Field types.
pub const FIELD_ASCII: u16 = 2;
pub const FIELD_SHORT: u16 = 3;
pub const FIELD_LONG: u16 = 4;
pub const FIELD_RATIONAL: u16 = 5;

// SampleFormat values.
pub const SAMPLE_FORMAT_UNSIGNED: u32 = 1;
pub const SAMPLE_FORMAT_SIGNED: u32 = 2;
pub const SAMPLE_FORMAT_FLOAT: u32 = 3;

// Compression codes on disk.
pub const COMPRESSION_NONE_CODE: u32 = 1;
pub const COMPRESSION_LZW_CODE: u32 = 5;
pub const COMPRESSION_THUMBNAIL_CODE: u32 = 7;
pub const COMPRESSION_PACK_BITS_CODE: u32 = 32773;

// Typed metadata side channel.
/// "IJIJ"
pub const META_MAGIC: u32 = 0x494a_494a;
/// "info" — free-text info property.
pub const META_INFO: u32 = 0x696e_666f;
/// "labl" — slice labels.
pub const META_LABELS: u32 = 0x6c61_626c;
/// "rang" — display ranges.
pub const META_RANGES: u32 = 0x7261_6e67;
/// "luts" — per-channel lookup tables.
pub const META_LUTS: u32 = 0x6c75_7473;
/// "roi " — region-of-interest blob.
pub const META_ROI: u32 = 0x726f_6920;
/// "over" — overlay blobs.
pub const META_OVERLAY: u32 = 0x6f76_6572;

/// Pixel encoding of one image plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelKind {
    /// 8-bit unsigned integer.
    U8,
    /// 8-bit unsigned integer with a color lookup table.
    U8Palette,
    /// 1-bit black and white.
    Bit1,
    /// 12-bit unsigned integer.
    U12,
    /// 16-bit unsigned integer.
    U16,
    /// 16-bit signed integer.
    I16,
    /// 32-bit signed integer.
    I32,
    /// 32-bit floating point.
    F32,
    /// 64-bit floating point.
    F64,
    /// 24-bit interleaved RGB.
    Rgb,
    /// 24-bit planar RGB.
    RgbPlanar,
    /// 32-bit interleaved ARGB.
    Argb,
    /// 48-bit interleaved RGB (three 16-bit samples).
    Rgb48,
}

impl PixelKind {
    /// Bytes used per pixel on disk.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::U8 | Self::U8Palette | Self::Bit1 => 1,
            Self::U12 | Self::U16 | Self::I16 => 2,
            Self::Rgb | Self::RgbPlanar => 3,
            Self::I32 | Self::F32 | Self::Argb => 4,
            Self::Rgb48 => 6,
            Self::F64 => 8,
        }
    }

    /// Short lowercase name used when reconciling read-path pixel kinds.
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::U8 => "byte",
            Self::U8Palette => "byte+lut",
            Self::Bit1 => "bitmap",
            Self::U12 => "ushort12",
            Self::U16 => "ushort",
            Self::I16 => "short",
            Self::I32 => "int",
            Self::F32 => "float",
            Self::F64 => "double",
            Self::Rgb => "RGB",
            Self::RgbPlanar => "RGB(p)",
            Self::Argb => "ARGB",
            Self::Rgb48 => "RGB48",
        }
    }

    /// BitsPerSample value written for this kind.
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            Self::Bit1 => 1,
            Self::U8 | Self::U8Palette | Self::Rgb | Self::RgbPlanar | Self::Argb => 8,
            Self::U12 => 12,
            Self::U16 | Self::I16 | Self::Rgb48 => 16,
            Self::I32 | Self::F32 => 32,
            Self::F64 => 64,
        }
    }

    /// Samples per pixel written for this kind.
    pub const fn samples_per_pixel(self) -> u16 {
        match self {
            Self::Rgb | Self::RgbPlanar | Self::Rgb48 => 3,
            Self::Argb => 4,
            _ => 1,
        }
    }
}

/// Compression scheme recorded for a plane. Pixel loads never decompress;
/// anything but `None` on the slice-access path is a constraint violation
/// reported at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lzw,
    LzwDifferencing,
    PackBits,
    Unknown,
}
