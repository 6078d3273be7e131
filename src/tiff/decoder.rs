//! Directory-chain decoder: walks the on-disk header and IFD chain of a
//! classic or wide container, producing one slice descriptor per image
//! plane plus accumulated file-level metadata.

use std::io::{Read, Seek, SeekFrom};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::tiff::descriptor::{FileMetadata, OffsetUnwrap, Palette, SliceDescriptor, StripArray};
use crate::tiff::format::{self, Compression, PixelKind};
use crate::tiff::metadata;
use crate::util::{Error, Result};

/// Everything a full decode yields.
#[derive(Debug)]
pub struct DecodedFile {
    pub slices: Vec<SliceDescriptor>,
    pub meta: FileMetadata,
}

/// Streaming decoder over any seekable byte source.
///
/// No caching: a pure sequential parse with random seeks for indirect
/// field values, restoring the stream position after each one.
pub struct TiffDecoder<R> {
    src: R,
    little_endian: bool,
    wide: bool,
    entry_size: u64,
    ifd_count: usize,
    vendor: bool,
    unwrap: OffsetUnwrap,
    pub(crate) meta_chunk_lengths: Vec<i32>,
    pub(crate) meta: FileMetadata,
}

impl<R: Read + Seek> TiffDecoder<R> {
    pub fn new(src: R) -> Self {
        Self {
            src,
            little_endian: false,
            wide: false,
            entry_size: format::ENTRY_SIZE_CLASSIC,
            ifd_count: 0,
            vendor: false,
            unwrap: OffsetUnwrap::new(),
            meta_chunk_lengths: Vec::new(),
            meta: FileMetadata::default(),
        }
    }

    /// Walks the whole directory chain.
    pub fn decode(mut self) -> Result<DecodedFile> {
        let mut ifd_offset = self.read_header()?;
        let mut slices: Vec<SliceDescriptor> = Vec::new();

        while ifd_offset > 0 {
            self.src.seek(SeekFrom::Start(ifd_offset))?;
            match self.read_directory()? {
                Some(fi) => {
                    ifd_offset = if self.wide {
                        let next = self.read_i64()?;
                        if next < 0 {
                            return Err(Error::NegativeOffset);
                        }
                        next as u64
                    } else {
                        self.read_u32()? as u64
                    };
                    let preseeded = fi.n_planes > 1;
                    debug!(
                        directory = self.ifd_count,
                        offset = fi.offset,
                        next = ifd_offset,
                        "decoded directory"
                    );
                    slices.push(fi);
                    if preseeded {
                        // A declared plane count makes the remaining
                        // directories redundant.
                        debug!("plane count pre-seeded, ignoring extra directories");
                        break;
                    }
                }
                None => break,
            }
        }

        if slices.is_empty() {
            return Err(Error::EmptyDirectoryChain);
        }

        let mut meta = self.meta;
        meta.little_endian = self.little_endian;
        meta.wide = self.wide;
        meta.vendor = self.vendor;
        meta.seen_large_offset = self.unwrap.seen_large_offset();
        if meta.info.is_none() && !meta.free_text.is_empty() {
            let joined: String = meta
                .free_text
                .iter()
                .map(|(k, v)| format!("{k}: {v}\n"))
                .collect();
            meta.info = Some(joined);
        }
        Ok(DecodedFile { slices, meta })
    }

    /// Parses the file header and returns the first directory offset.
    fn read_header(&mut self) -> Result<u64> {
        let marker = self.src.read_u16::<BigEndian>()?;
        match marker {
            format::MARKER_LITTLE_ENDIAN => self.little_endian = true,
            format::MARKER_BIG_ENDIAN => self.little_endian = false,
            other => return Err(Error::BadByteOrderMarker(other)),
        }
        let version = self.read_u16()?;
        match version {
            format::VERSION_CLASSIC => {
                self.wide = false;
                self.entry_size = format::ENTRY_SIZE_CLASSIC;
                Ok(self.read_u32()? as u64)
            }
            format::VERSION_WIDE => {
                self.wide = true;
                self.entry_size = format::ENTRY_SIZE_WIDE;
                let offset_size = self.read_u16()?;
                if offset_size != 8 {
                    return Err(Error::BadOffsetSize(offset_size));
                }
                let reserved = self.read_u16()?;
                if reserved != 0 {
                    return Err(Error::invalid(format!(
                        "expected zero constant at offset 6 of wide-format header, found {reserved}"
                    )));
                }
                let offset = self.read_i64()?;
                if offset < 0 {
                    return Err(Error::NegativeOffset);
                }
                Ok(offset as u64)
            }
            other => Err(Error::BadVersionMarker(other)),
        }
    }

    /// Reads one directory's worth of entries into a descriptor.
    ///
    /// Returns `None` for the soft termination: an unknown private-range
    /// tag on a directory after the first means the file was not produced
    /// by a writer we understand, and the walk keeps what it has.
    fn read_directory(&mut self) -> Result<Option<SliceDescriptor>> {
        let n_entries = if self.wide {
            self.read_i64()? as u64
        } else {
            self.read_u16()? as u64
        };
        if n_entries < 1 || n_entries > format::MAX_DIRECTORY_ENTRIES {
            return Err(Error::AberrantEntryCount(n_entries));
        }
        self.ifd_count += 1;
        let mut fi = SliceDescriptor::new(0, 0, PixelKind::U8);

        for _ in 0..n_entries {
            let tag = self.read_u16()?;
            let field_type = self.read_u16()?;
            let count = if self.wide {
                self.read_i64()?
            } else {
                self.read_i32()? as i64
            };
            let lvalue = self.read_entry_value(field_type, count)?;
            if !self.dispatch_tag(tag, count, lvalue, &mut fi)? {
                return Ok(None);
            }
        }
        Ok(Some(fi))
    }

    /// Reads the entry's value-or-offset field, consuming it fully
    /// (including padding) so the stream lands on the next entry.
    fn read_entry_value(&mut self, field_type: u16, count: i64) -> Result<i64> {
        if field_type == format::FIELD_SHORT && count == 1 {
            let v = self.read_u16()? as i64;
            self.read_u16()?;
            if self.wide {
                self.read_u32()?;
            }
            Ok(v)
        } else if self.wide {
            self.read_i64()
        } else {
            Ok(self.read_i32()? as i64)
        }
    }

    /// Returns `false` to request the soft chain termination.
    fn dispatch_tag(
        &mut self,
        tag: u16,
        count: i64,
        lvalue: i64,
        fi: &mut SliceDescriptor,
    ) -> Result<bool> {
        match tag {
            format::IMAGE_WIDTH => fi.width = lvalue as usize,
            format::IMAGE_LENGTH => fi.height = lvalue as usize,
            format::STRIP_OFFSETS => {
                let mut strips: StripArray = SmallVec::new();
                if count == 1 {
                    strips.push(lvalue);
                } else {
                    let save = self.pos()?;
                    self.seek_to(lvalue as u64)?;
                    for _ in 0..count {
                        let v = if self.wide {
                            self.read_i64()?
                        } else {
                            self.read_u32()? as i64
                        };
                        strips.push(v);
                    }
                    self.seek_to(save)?;
                }
                fi.offset = self.unwrap.resolve(self.vendor, &mut strips)?;
                fi.strip_offsets = strips;
            }
            format::STRIP_BYTE_COUNTS => {
                let mut lengths: StripArray = SmallVec::new();
                if count == 1 {
                    lengths.push(lvalue);
                } else {
                    let save = self.pos()?;
                    self.seek_to(lvalue as u64)?;
                    for _ in 0..count {
                        let v = if self.wide {
                            self.read_i64()?
                        } else {
                            self.read_i32()? as i64
                        };
                        lengths.push(v);
                    }
                    self.seek_to(save)?;
                }
                fi.strip_lengths = lengths;
            }
            format::BITS_PER_SAMPLE => {
                if count == 1 {
                    fi.pixel_kind = match lvalue {
                        8 => PixelKind::U8,
                        16 => PixelKind::U16,
                        32 => PixelKind::I32,
                        12 => PixelKind::U12,
                        1 => PixelKind::Bit1,
                        other => {
                            return Err(Error::UnsupportedPixelKind(format!(
                                "BitsPerSample {other}"
                            )))
                        }
                    };
                } else {
                    // All channels assumed to share one bit depth; only
                    // the first value is consulted.
                    let save = self.pos()?;
                    self.seek_to(lvalue as u64)?;
                    let bit_depth = self.read_u16()?;
                    self.seek_to(save)?;
                    match bit_depth {
                        8 => {}
                        16 => fi.pixel_kind = PixelKind::Rgb48,
                        other => {
                            return Err(Error::UnsupportedPixelKind(format!(
                                "{other} bit/channel multi-sample image"
                            )))
                        }
                    }
                }
            }
            format::SAMPLES_PER_PIXEL => {
                fi.samples_per_pixel = lvalue as u32;
                if lvalue == 3 && fi.pixel_kind != PixelKind::Rgb48 {
                    fi.pixel_kind = if fi.pixel_kind == PixelKind::U16 {
                        PixelKind::Rgb48
                    } else {
                        PixelKind::Rgb
                    };
                }
            }
            format::ROWS_PER_STRIP => fi.rows_per_strip = lvalue as u32,
            format::X_RESOLUTION => {
                let scale = self.read_rational(lvalue as u64)?;
                if scale != 0.0 {
                    fi.pixel_width = 1.0 / scale;
                }
            }
            format::Y_RESOLUTION => {
                let scale = self.read_rational(lvalue as u64)?;
                if scale != 0.0 {
                    fi.pixel_height = 1.0 / scale;
                }
            }
            format::RESOLUTION_UNIT => match lvalue {
                1 if fi.unit.is_none() => fi.unit = Some(" ".to_owned()),
                2 => {
                    if fi.pixel_width == 1.0 / 72.0 {
                        // Screen resolution stamped by image editors, not
                        // a real calibration.
                        fi.pixel_width = 1.0;
                        fi.pixel_height = 1.0;
                    } else {
                        fi.unit = Some("inch".to_owned());
                    }
                }
                3 => fi.unit = Some("cm".to_owned()),
                _ => {}
            },
            format::PLANAR_CONFIGURATION => {
                if lvalue == 2 && fi.pixel_kind == PixelKind::Rgb48 {
                    fi.pixel_kind = PixelKind::U16;
                } else if lvalue == 2 && fi.pixel_kind == PixelKind::Rgb {
                    fi.pixel_kind = PixelKind::RgbPlanar;
                } else if lvalue == 1 && fi.samples_per_pixel == 4 {
                    fi.pixel_kind = PixelKind::Argb;
                } else if lvalue != 2 && !(fi.samples_per_pixel == 1 || fi.samples_per_pixel == 3) {
                    return Err(Error::UnsupportedPixelKind(format!(
                        "SamplesPerPixel {}",
                        fi.samples_per_pixel
                    )));
                }
            }
            format::COMPRESSION => {
                if lvalue == format::COMPRESSION_LZW_CODE as i64 {
                    fi.compression = Compression::Lzw;
                } else if lvalue == format::COMPRESSION_PACK_BITS_CODE as i64 {
                    fi.compression = Compression::PackBits;
                } else if lvalue != 1
                    && lvalue != 0
                    && !(lvalue == format::COMPRESSION_THUMBNAIL_CODE as i64 && fi.width < 500)
                {
                    // The width guard tolerates camera thumbnail planes.
                    fi.compression = Compression::Unknown;
                    return Err(Error::UnsupportedCompression(lvalue as u32));
                }
            }
            format::SOFTWARE | format::DATE_TIME | format::HOST_COMPUTER | format::ARTIST => {
                if self.ifd_count == 1 {
                    if let Some(s) = self.read_string(count, lvalue as u64)? {
                        self.meta.free_text.insert(tag_name(tag).to_owned(), s);
                    }
                }
            }
            format::PREDICTOR => {
                if lvalue == 2 && fi.compression == Compression::Lzw {
                    fi.compression = Compression::LzwDifferencing;
                }
            }
            format::COLOR_MAP => {
                if count == 768 && fi.pixel_kind == PixelKind::U8 {
                    self.read_color_map(lvalue as u64, fi)?;
                }
            }
            format::SAMPLE_FORMAT => {
                if fi.pixel_kind == PixelKind::I32
                    && lvalue == format::SAMPLE_FORMAT_FLOAT as i64
                {
                    fi.pixel_kind = PixelKind::F32;
                }
                if fi.pixel_kind == PixelKind::U16 {
                    if lvalue == format::SAMPLE_FORMAT_SIGNED as i64 {
                        fi.pixel_kind = PixelKind::I16;
                    }
                    if lvalue == format::SAMPLE_FORMAT_FLOAT as i64 {
                        return Err(Error::UnsupportedPixelKind(
                            "16-bit floating point".to_owned(),
                        ));
                    }
                }
            }
            format::IMAGE_DESCRIPTION => {
                if self.ifd_count == 1 {
                    if let Some(s) = self.read_string(count, lvalue as u64)? {
                        debug!(description = %s, "image description");
                        metadata::apply_image_description(&s, fi, &mut self.meta);
                    }
                }
            }
            format::ORIENTATION => {
                // Not one of ours: every directory has to be walked.
                fi.n_planes = 0;
            }
            format::NIH_IMAGE_HDR => {
                if count == 256 {
                    self.read_nih_header(lvalue, fi)?;
                }
            }
            format::VENDOR_INFO => {
                self.vendor = true;
                self.read_vendor_block(lvalue as u64, fi)?;
            }
            format::NEW_SUBFILE_TYPE => {
                if lvalue == 1 {
                    fi.is_thumbnail = true;
                }
            }
            format::META_DATA_BYTE_COUNTS => {
                let save = self.pos()?;
                self.seek_to(lvalue as u64)?;
                self.meta_chunk_lengths.clear();
                for _ in 0..count {
                    // Chunk lengths stay 32-bit even in the wide format.
                    let len = self.read_i32()?;
                    self.meta_chunk_lengths.push(len);
                }
                self.seek_to(save)?;
            }
            format::META_DATA => {
                self.read_meta_chunks(lvalue as u64)?;
            }
            other => {
                if other > 10000 && other < 32768 && self.ifd_count > 1 {
                    debug!(tag = other, "unknown private tag past first directory, stopping walk");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Resolution tags store a numerator/denominator pair at the indirect
    /// offset. This read is a known-suspect path: the on-disk field is
    /// probably a double, but files written by this codec carry the pair
    /// representation, so both sides stay consistent. Do not change one
    /// without the other.
    fn read_rational(&mut self, loc: u64) -> Result<f64> {
        debug!("reading resolution as an integer rational, a known-suspect representation");
        let save = self.pos()?;
        self.seek_to(loc)?;
        let numerator = self.read_i32()?;
        let denominator = self.read_i32()?;
        self.seek_to(save)?;
        if denominator != 0 {
            Ok(numerator as f64 / denominator as f64)
        } else {
            Ok(0.0)
        }
    }

    /// NUL-terminated string field; `count` includes the terminator.
    fn read_string(&mut self, count: i64, offset: u64) -> Result<Option<String>> {
        let len = count - 1;
        if len <= 0 {
            return Ok(None);
        }
        let save = self.pos()?;
        self.seek_to(offset)?;
        let mut bytes = vec![0u8; len as usize];
        self.src.read_exact(&mut bytes)?;
        self.seek_to(save)?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// 768-entry color map stored as 16-bit values; only one byte per
    /// entry is meaningful, picked by endianness.
    fn read_color_map(&mut self, offset: u64, fi: &mut SliceDescriptor) -> Result<()> {
        let save = self.pos()?;
        self.seek_to(offset)?;
        let mut table = vec![0u8; 768 * 2];
        self.src.read_exact(&mut table)?;
        self.seek_to(save)?;

        let mut palette = Palette {
            reds: [0; 256],
            greens: [0; 256],
            blues: [0; 256],
        };
        let mut j = usize::from(self.little_endian);
        let mut sum: i64 = 0;
        for i in 0..256 {
            palette.reds[i] = table[j];
            sum += palette.reds[i] as i8 as i64;
            palette.greens[i] = table[512 + j];
            sum += palette.greens[i] as i8 as i64;
            palette.blues[i] = table[1024 + j];
            sum += palette.blues[i] as i8 as i64;
            j += 2;
        }
        if sum != 0 {
            fi.pixel_kind = PixelKind::U8Palette;
            self.meta.palette = Some(palette);
        }
        Ok(())
    }

    /// Legacy NIH Image calibration block. All reads are big-endian
    /// regardless of the file's byte order; fields live at fixed offsets
    /// within the 256-byte block.
    fn read_nih_header(&mut self, offset: i64, fi: &mut SliceDescriptor) -> Result<()> {
        let save = self.pos()?;
        let base = offset as u64;

        self.seek_to(base + self.entry_size)?;
        let version = self.src.read_i16::<BigEndian>()?;

        self.seek_to(base + 160)?;
        let scale = self.src.read_f64::<BigEndian>()?;
        if version > 106 && scale != 0.0 {
            fi.pixel_width = 1.0 / scale;
            fi.pixel_height = fi.pixel_width;
        }

        self.seek_to(base + 172)?;
        let mut units = self.src.read_i16::<BigEndian>()?;
        if version <= 153 {
            units += 5;
        }
        fi.unit = match units {
            5 => Some("nanometer".to_owned()),
            6 => Some("micrometer".to_owned()),
            7 => Some("mm".to_owned()),
            8 => Some("cm".to_owned()),
            9 => Some("meter".to_owned()),
            10 => Some("km".to_owned()),
            11 => Some("inch".to_owned()),
            12 => Some("ft".to_owned()),
            13 => Some("mi".to_owned()),
            other => {
                warn!(units = other, "unknown spatial unit code in legacy header");
                fi.unit.take()
            }
        };

        // Density calibration: decoded for stream discipline but carried
        // no further, the pixel pipeline has no use for it.
        self.seek_to(base + 182)?;
        let fit_type = self.src.read_u8()?;
        self.src.read_u8()?;
        let n_coefficients = self.src.read_i16::<BigEndian>()?;
        if fit_type != 11 && fit_type <= 8 && (1..=5).contains(&n_coefficients) {
            for _ in 0..n_coefficients {
                let coefficient = self.src.read_f64::<BigEndian>()?;
                debug!(coefficient, "legacy density calibration coefficient");
            }
        }

        self.seek_to(base + 260)?;
        let n_images = self.src.read_i16::<BigEndian>()?;
        if n_images >= 2
            && (fi.pixel_kind == PixelKind::U8 || fi.pixel_kind == PixelKind::U8Palette)
        {
            fi.n_planes = n_images as usize;
            fi.pixel_depth = self.src.read_f32::<BigEndian>()? as f64;
            self.src.read_i16::<BigEndian>()?;
            fi.frame_interval = self.src.read_f32::<BigEndian>()? as f64;
        }

        self.seek_to(base + 272)?;
        let aspect_ratio = self.src.read_f32::<BigEndian>()?;
        if version > 140 && aspect_ratio != 0.0 {
            fi.pixel_height = fi.pixel_width / aspect_ratio as f64;
        }

        self.seek_to(save)?;
        Ok(())
    }

    // Endianness-switched wire reads.

    pub(crate) fn is_little_endian(&self) -> bool {
        self.little_endian
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        Ok(if self.little_endian {
            self.src.read_u16::<LittleEndian>()?
        } else {
            self.src.read_u16::<BigEndian>()?
        })
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        Ok(if self.little_endian {
            self.src.read_i32::<LittleEndian>()?
        } else {
            self.src.read_i32::<BigEndian>()?
        })
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_i32()? as u32)
    }

    pub(crate) fn read_i64(&mut self) -> Result<i64> {
        Ok(if self.little_endian {
            self.src.read_i64::<LittleEndian>()?
        } else {
            self.src.read_i64::<BigEndian>()?
        })
    }

    pub(crate) fn read_f64(&mut self) -> Result<f64> {
        Ok(if self.little_endian {
            self.src.read_f64::<LittleEndian>()?
        } else {
            self.src.read_f64::<BigEndian>()?
        })
    }

    /// Little-endian double, used inside the vendor block whose payload
    /// ignores the file's declared byte order.
    pub(crate) fn read_f64_le(&mut self) -> Result<f64> {
        Ok(self.src.read_f64::<LittleEndian>()?)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        Ok(self.src.read_u8()?)
    }

    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.src.read_exact(buf)?;
        Ok(())
    }

    pub(crate) fn pos(&mut self) -> Result<u64> {
        Ok(self.src.stream_position()?)
    }

    pub(crate) fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.src.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    pub(crate) fn skip(&mut self, n: i64) -> Result<()> {
        self.src.seek(SeekFrom::Current(n))?;
        Ok(())
    }
}

fn tag_name(tag: u16) -> &'static str {
    match tag {
        format::SOFTWARE => "Software",
        format::DATE_TIME => "DateTime",
        format::HOST_COMPUTER => "HostComputer",
        format::ARTIST => "Artist",
        format::IMAGE_DESCRIPTION => "ImageDescription",
        _ => "Unknown",
    }
}
