//! Random access to a stack's planes, and the sequential write surface.
//!
//! Opening for read decodes the directory chain and reconciles the plane
//! table from whichever metadata source is present: a structured
//! description block, the vendor microscopy block, or bare directories.
//! Opening for write produces planes strictly in order through the
//! background writer, then the finished file round-trips through the same
//! read path.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::tiff::cache::{BufferPool, SliceCache};
use crate::tiff::decoder::{DecodedFile, TiffDecoder};
use crate::tiff::descriptor::{
    Calibration, ChannelInfo, FileMetadata, PixelBuffer, SliceDescriptor, SliceTable,
};
use crate::tiff::format::PixelKind;
use crate::tiff::metadata;
use crate::tiff::writer::SequentialWriter;
use crate::util::{Error, Result};

/// Options for [`SliceAccessor::open_for_write`].
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    /// Use the 64-bit-offset (wide) layout.
    pub wide: bool,
    pub little_endian: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            wide: false,
            little_endian: true,
        }
    }
}

struct Planes {
    descriptors: Vec<SliceDescriptor>,
    /// Per-plane readability; all true on read-open, flipped by writes.
    readable: Vec<bool>,
}

struct WriteState {
    writer: SequentialWriter,
    /// Index of the last plane handed to the writer; -1 before the first.
    last_written: i64,
    depth: usize,
}

/// Shared random-access handle over one stack file.
///
/// All methods take `&self`; the accessor can sit behind an `Arc` and serve
/// several reader threads at once.
pub struct SliceAccessor {
    path: PathBuf,
    planes: Mutex<Planes>,
    meta: FileMetadata,
    width: usize,
    height: usize,
    pixel_kind: PixelKind,
    n_channels: usize,
    calibration: Calibration,
    cache: SliceCache,
    pool: BufferPool,
    file: Mutex<Option<File>>,
    writer: Mutex<Option<WriteState>>,
}

impl SliceAccessor {
    /// Decodes the file and reconciles its plane table.
    pub fn open_for_read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|_| Error::FileNotFound(path.clone()))?;
        let decoded = TiffDecoder::new(BufReader::new(file)).decode()?;
        Self::from_decoded(path, decoded)
    }

    fn from_decoded(path: PathBuf, decoded: DecodedFile) -> Result<Self> {
        let DecodedFile { mut slices, mut meta } = decoded;
        let fi0 = slices[0].clone();

        let mut calibration = Calibration {
            pixel_width: fi0.pixel_width,
            pixel_height: fi0.pixel_height,
            pixel_depth: fi0.pixel_depth,
            unit: fi0.unit.clone(),
            frame_interval: fi0.frame_interval,
        };
        let mut n_channels = 1usize;

        let structured = fi0
            .description
            .as_deref()
            .filter(|d| d.starts_with("ImageJ"))
            .map(metadata::parse_description);

        if let Some(props) = structured {
            calibration.pixel_depth = props.spacing.unwrap_or(1.0);
            n_channels = props.channels.unwrap_or(1);
            if props.unit.is_some() {
                calibration.unit = props.unit;
            }
            if let Some(fi) = props.frame_interval {
                calibration.frame_interval = fi;
            }
            if props.original_file.is_some() {
                meta.channel_info = props
                    .detections
                    .chunks(2)
                    .map(|pair| ChannelInfo {
                        detection_start: pair[0] as f64,
                        detection_end: *pair.get(1).unwrap_or(&pair[0]) as f64,
                    })
                    .collect();
                meta.original_file = props.original_file;
            }
        } else if meta.vendor {
            slices.retain(|d| !d.is_thumbnail);
            if slices.is_empty() {
                return Err(Error::invalid("only thumbnail directories present"));
            }
            calibration.pixel_depth = slices[0].pixel_depth;
            if meta.frame_interval != 0.0 {
                calibration.frame_interval = meta.frame_interval;
            }
            // Channels are stored as one strip each; split every directory
            // into per-channel single-sample planes.
            if slices[0].strip_offsets.len() > 1 {
                n_channels = slices[0].strip_offsets.len();
                let mut split = Vec::with_capacity(slices.len() * n_channels);
                for d in &slices {
                    for &strip in d.strip_offsets.iter() {
                        let mut c = d.clone();
                        c.offset = strip;
                        c.samples_per_pixel = 1;
                        c.strip_offsets.clear();
                        c.strip_lengths.clear();
                        split.push(c);
                    }
                }
                slices = split;
            }
        }

        // Large resolved offsets mean 32-bit arithmetic already wrapped
        // once; synthesized offsets would not be trustworthy.
        let synthesizable = !(meta.vendor || meta.seen_large_offset);
        let table = if slices.len() == 1 && slices[0].n_planes > 1 && synthesizable {
            let proto = slices.remove(0);
            let count = proto.n_planes;
            let stride = proto.plane_bytes() as i64 + proto.gap_between_planes;
            info!(count, stride, "synthesizing plane table from single directory");
            SliceTable::Synthesized {
                proto: Box::new(proto),
                count,
                stride,
            }
        } else {
            SliceTable::Decoded(slices)
        };
        let descriptors = table.materialize();
        let first = descriptors[0].clone();

        // The read surface only decodes planar 8/16/32-bit samples; names
        // outside this set have no single in-memory sample type.
        match first.pixel_kind.short_name() {
            "float" | "ushort" | "short" | "byte" | "byte+lut" => {}
            other => return Err(Error::UnsupportedPixelKind(other.to_owned())),
        }
        if first.compression != crate::tiff::format::Compression::None {
            return Err(Error::invalid(format!(
                "{:?}-compressed pixel data cannot be read through the slice accessor",
                first.compression
            )));
        }

        let n = descriptors.len();
        Ok(Self {
            path,
            planes: Mutex::new(Planes {
                descriptors,
                readable: vec![true; n],
            }),
            meta,
            width: first.width,
            height: first.height,
            pixel_kind: first.pixel_kind,
            n_channels,
            calibration,
            cache: SliceCache::new(),
            pool: BufferPool::new(),
            file: Mutex::new(None),
            writer: Mutex::new(None),
        })
    }

    /// Creates a file for strictly sequential plane writes. `depth` planes
    /// are declared up front; the description is rewritten if the file is
    /// closed early.
    pub fn open_for_write(
        path: impl AsRef<Path>,
        width: usize,
        height: usize,
        depth: usize,
        pixel_kind: PixelKind,
        calibration: Calibration,
        options: WriteOptions,
    ) -> Result<Self> {
        if depth == 0 {
            return Err(Error::invalid("depth must be set before writing"));
        }
        let path = path.as_ref().to_path_buf();
        let description = metadata::build_description(
            depth,
            depth,
            1,
            pixel_kind,
            &calibration,
            None,
            &[],
        );
        let writer = SequentialWriter::begin(
            &path,
            options.wide,
            options.little_endian,
            width,
            height,
            pixel_kind,
            &description,
            &calibration,
        )?;

        let mut proto = SliceDescriptor::new(width, height, pixel_kind);
        proto.pixel_width = calibration.pixel_width;
        proto.pixel_height = calibration.pixel_height;
        proto.pixel_depth = calibration.pixel_depth;
        proto.unit = calibration.unit.clone();
        proto.frame_interval = calibration.frame_interval;
        let descriptors = vec![proto; depth];

        let meta = FileMetadata {
            little_endian: options.little_endian,
            wide: options.wide,
            ..FileMetadata::default()
        };

        Ok(Self {
            path,
            planes: Mutex::new(Planes {
                descriptors,
                readable: vec![false; depth],
            }),
            meta,
            width,
            height,
            pixel_kind,
            n_channels: 1,
            calibration,
            cache: SliceCache::new(),
            pool: BufferPool::new(),
            file: Mutex::new(None),
            writer: Mutex::new(Some(WriteState {
                writer,
                last_written: -1,
                depth,
            })),
        })
    }

    pub fn n_slices(&self) -> usize {
        self.planes.lock().descriptors.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixel_kind(&self) -> PixelKind {
        self.pixel_kind
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.meta
    }

    /// Verifies the file against externally declared dimensions.
    pub fn check_dimensions(&self, width: usize, height: usize, depth: usize) -> Result<()> {
        if self.width != width {
            return Err(Error::DimensionMismatch {
                axis: "width",
                expected: width,
                actual: self.width,
            });
        }
        if self.height != height {
            return Err(Error::DimensionMismatch {
                axis: "height",
                expected: height,
                actual: self.height,
            });
        }
        let n = self.n_slices();
        if n != depth {
            return Err(Error::DimensionMismatch {
                axis: "depth",
                expected: depth,
                actual: n,
            });
        }
        Ok(())
    }

    /// Fetches one decoded plane, through the cache unless `use_cache` is
    /// false. Either way, concurrent requests for the same plane share a
    /// single underlying read.
    pub fn get_slice(&self, index: usize, use_cache: bool) -> Result<Arc<PixelBuffer>> {
        let descriptor = {
            let planes = self.planes.lock();
            if index >= planes.descriptors.len() {
                return Err(Error::invalid(format!(
                    "slice index {index} out of range (0..{})",
                    planes.descriptors.len()
                )));
            }
            if !planes.readable[index] {
                return Err(Error::SliceNotWritten(index));
            }
            planes.descriptors[index].clone()
        };

        // Pending asynchronous writes must reach the disk before the read
        // path can see them.
        if let Some(ws) = self.writer.lock().as_mut() {
            ws.writer.flush()?;
        }

        let loader = || self.load_slice(&descriptor);
        if use_cache {
            self.cache.get_or_load(index, loader)
        } else {
            self.cache.load_uncached(index, loader)
        }
    }

    fn load_slice(&self, d: &SliceDescriptor) -> Result<PixelBuffer> {
        let n_bytes = d.plane_bytes();
        self.pool.set_size(n_bytes);
        let mut buf = self.pool.checkout();

        let mut count = self.read_at(d.offset as u64, &mut buf)?;
        if count == 0 {
            // A stale handle reads as end-of-file; re-open and retry once.
            debug!(path = %self.path.display(), "read hit EOF, re-opening");
            self.reopen()?;
            count = self.read_at(d.offset as u64, &mut buf)?;
        }
        if count < n_bytes {
            return Err(Error::ShortRead {
                read: count,
                expected: n_bytes,
                path: self.path.clone(),
            });
        }

        let n = d.width * d.height * d.samples_per_pixel as usize;
        Ok(match d.pixel_kind.bytes_per_pixel() {
            1 => PixelBuffer::U8(buf[..n].to_vec()),
            2 => {
                let mut v = vec![0u16; n];
                if self.meta.little_endian {
                    LittleEndian::read_u16_into(&buf[..n * 2], &mut v);
                } else {
                    BigEndian::read_u16_into(&buf[..n * 2], &mut v);
                }
                PixelBuffer::U16(v)
            }
            _ => {
                let mut v = vec![0.0f32; n];
                if self.meta.little_endian {
                    LittleEndian::read_f32_into(&buf[..n * 4], &mut v);
                } else {
                    BigEndian::read_f32_into(&buf[..n * 4], &mut v);
                }
                PixelBuffer::F32(v)
            }
        })
    }

    /// Positioned read through the shared handle, opening it on demand.
    /// Returns the number of bytes read before end-of-file.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut guard = self.file.lock();
        let file = match guard.as_mut() {
            Some(f) => f,
            None => {
                if self.planes.lock().descriptors.is_empty() {
                    return Err(Error::NoDescriptorTable);
                }
                guard.insert(File::open(&self.path)?)
            }
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut total = 0usize;
        while total < buf.len() {
            match file.read(&mut buf[total..]) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn reopen(&self) -> Result<()> {
        if self.planes.lock().descriptors.is_empty() {
            return Err(Error::NoDescriptorTable);
        }
        *self.file.lock() = Some(File::open(&self.path)?);
        Ok(())
    }

    /// Writes the next plane. Planes must arrive strictly in order; the
    /// final plane completes the file and closes the write side.
    pub fn put_slice(&self, index: usize, pixels: &PixelBuffer) -> Result<()> {
        let mut guard = self.writer.lock();
        let ws = guard.as_mut().ok_or(Error::NotWriting("put_slice"))?;
        let expected = (ws.last_written + 1) as usize;
        if index != expected {
            return Err(Error::NonSequentialWrite {
                expected,
                got: index,
            });
        }

        ws.writer.write_slice(pixels)?;
        ws.last_written = index as i64;

        let layout = ws.writer.layout();
        {
            let mut planes = self.planes.lock();
            planes.descriptors[index].offset =
                (layout.data_start + index as u64 * layout.plane_bytes) as i64;
            planes.readable[index] = true;
        }

        if index + 1 == ws.depth {
            ws.writer.finish()?;
            *guard = None;
            debug!(path = %self.path.display(), "final plane written, file complete");
        }
        Ok(())
    }

    /// Writes the next plane from pre-serialized bytes.
    pub fn dump_buffer(&self, index: usize, bytes: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock();
        let ws = guard.as_mut().ok_or(Error::NotWriting("dump_buffer"))?;
        let expected = (ws.last_written + 1) as usize;
        if index != expected {
            return Err(Error::NonSequentialWrite {
                expected,
                got: index,
            });
        }

        ws.writer.dump_buffer(bytes)?;
        ws.last_written = index as i64;

        let layout = ws.writer.layout();
        {
            let mut planes = self.planes.lock();
            planes.descriptors[index].offset =
                (layout.data_start + index as u64 * layout.plane_bytes) as i64;
            planes.readable[index] = true;
        }

        if index + 1 == ws.depth {
            ws.writer.finish()?;
            *guard = None;
        }
        Ok(())
    }

    /// Completes a partially written file: the plane count in the
    /// description is rewritten to the number actually written and the
    /// table is truncated to match.
    pub fn close_early(&self) -> Result<()> {
        let mut guard = self.writer.lock();
        let ws = guard.as_mut().ok_or(Error::NotWriting("close_early"))?;
        if ws.last_written < 0 {
            return Err(Error::SliceNotWritten(0));
        }
        let written = (ws.last_written + 1) as usize;
        let truncated = metadata::build_description(
            written,
            written,
            1,
            self.pixel_kind,
            &self.calibration,
            None,
            &[],
        );
        ws.writer.finish_early(&truncated)?;
        *guard = None;

        let mut planes = self.planes.lock();
        planes.descriptors.truncate(written);
        planes.readable.truncate(written);
        info!(written, "file closed early");
        Ok(())
    }

    /// Releases the file handle and drops cached planes. A later read
    /// re-opens the file transparently.
    pub fn close(&self) -> Result<()> {
        if let Some(mut ws) = self.writer.lock().take() {
            ws.writer.finish()?;
        }
        *self.file.lock() = None;
        self.cache.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        dir.path().join(name)
    }

    fn write_stack(path: &Path, depth: usize, options: WriteOptions) -> Result<()> {
        let accessor = SliceAccessor::open_for_write(
            path,
            4,
            3,
            depth,
            PixelKind::U16,
            Calibration::default(),
            options,
        )?;
        for i in 0..depth {
            let pixels: Vec<u16> = (0..12).map(|p| (i * 1000 + p) as u16).collect();
            accessor.put_slice(i, &PixelBuffer::U16(pixels))?;
        }
        Ok(())
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        write_stack(&path, 3, WriteOptions::default()).unwrap();

        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        assert_eq!(accessor.n_slices(), 3);
        accessor.check_dimensions(4, 3, 3).unwrap();
        for i in 0..3 {
            let slice = accessor.get_slice(i, true).unwrap();
            let expected: Vec<u16> = (0..12).map(|p| (i * 1000 + p) as u16).collect();
            assert_eq!(*slice, PixelBuffer::U16(expected));
        }
    }

    #[test]
    fn test_wide_layout_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "wide.tif");
        write_stack(
            &path,
            2,
            WriteOptions {
                wide: true,
                little_endian: false,
            },
        )
        .unwrap();

        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        assert!(accessor.metadata().wide);
        assert!(!accessor.metadata().little_endian);
        let slice = accessor.get_slice(1, true).unwrap();
        let expected: Vec<u16> = (0..12).map(|p| 1000 + p).collect();
        assert_eq!(*slice, PixelBuffer::U16(expected));
    }

    #[test]
    fn test_out_of_order_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        let accessor = SliceAccessor::open_for_write(
            &path,
            4,
            3,
            2,
            PixelKind::U16,
            Calibration::default(),
            WriteOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            accessor.put_slice(1, &PixelBuffer::U16(vec![0; 12])),
            Err(Error::NonSequentialWrite {
                expected: 0,
                got: 1
            })
        ));
    }

    #[test]
    fn test_read_before_write_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        let accessor = SliceAccessor::open_for_write(
            &path,
            4,
            3,
            2,
            PixelKind::U16,
            Calibration::default(),
            WriteOptions::default(),
        )
        .unwrap();
        accessor
            .put_slice(0, &PixelBuffer::U16(vec![7; 12]))
            .unwrap();
        assert!(matches!(
            accessor.get_slice(1, true),
            Err(Error::SliceNotWritten(1))
        ));
        // The written plane is readable through the same handle.
        let slice = accessor.get_slice(0, true).unwrap();
        assert_eq!(*slice, PixelBuffer::U16(vec![7; 12]));
    }

    #[test]
    fn test_close_early_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        let accessor = SliceAccessor::open_for_write(
            &path,
            4,
            3,
            5,
            PixelKind::U16,
            Calibration::default(),
            WriteOptions::default(),
        )
        .unwrap();
        accessor
            .put_slice(0, &PixelBuffer::U16(vec![1; 12]))
            .unwrap();
        accessor
            .put_slice(1, &PixelBuffer::U16(vec![2; 12]))
            .unwrap();
        accessor.close_early().unwrap();
        assert_eq!(accessor.n_slices(), 2);

        let reread = SliceAccessor::open_for_read(&path).unwrap();
        assert_eq!(reread.n_slices(), 2);
        assert_eq!(*reread.get_slice(1, true).unwrap(), PixelBuffer::U16(vec![2; 12]));
    }

    #[test]
    fn test_close_early_after_single_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        let accessor = SliceAccessor::open_for_write(
            &path,
            4,
            3,
            10,
            PixelKind::U16,
            Calibration::default(),
            WriteOptions::default(),
        )
        .unwrap();
        accessor
            .put_slice(0, &PixelBuffer::U16(vec![9; 12]))
            .unwrap();
        // The one-plane description drops its conditional lines; the
        // rewrite must still fit the original field.
        accessor.close_early().unwrap();
        assert_eq!(accessor.n_slices(), 1);

        let reread = SliceAccessor::open_for_read(&path).unwrap();
        assert_eq!(reread.n_slices(), 1);
        assert_eq!(*reread.get_slice(0, true).unwrap(), PixelBuffer::U16(vec![9; 12]));
    }

    #[test]
    fn test_close_early_requires_a_written_slice() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        let accessor = SliceAccessor::open_for_write(
            &path,
            4,
            3,
            2,
            PixelKind::U16,
            Calibration::default(),
            WriteOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            accessor.close_early(),
            Err(Error::SliceNotWritten(0))
        ));
    }

    #[test]
    fn test_writes_rejected_after_completion() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        write_stack(&path, 2, WriteOptions::default()).unwrap();
        // write_stack drops its accessor; open a fresh one read-only.
        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        assert!(matches!(
            accessor.put_slice(2, &PixelBuffer::U16(vec![0; 12])),
            Err(Error::NotWriting(_))
        ));
    }

    #[test]
    fn test_cached_reads_share_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        write_stack(&path, 2, WriteOptions::default()).unwrap();

        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        let a = accessor.get_slice(0, true).unwrap();
        let b = accessor.get_slice(0, true).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_uncached_read_is_not_retained() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        write_stack(&path, 2, WriteOptions::default()).unwrap();

        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        let a = accessor.get_slice(0, false).unwrap();
        let b = accessor.get_slice(0, false).unwrap();
        assert_eq!(*a, *b);
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_read_survives_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        write_stack(&path, 2, WriteOptions::default()).unwrap();

        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        let before = accessor.get_slice(0, true).unwrap();
        accessor.close().unwrap();
        let after = accessor.get_slice(0, true).unwrap();
        assert_eq!(*before, *after);
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = temp_path(&dir, "stack.tif");
        write_stack(&path, 2, WriteOptions::default()).unwrap();
        let accessor = SliceAccessor::open_for_read(&path).unwrap();
        assert!(matches!(
            accessor.check_dimensions(5, 3, 2),
            Err(Error::DimensionMismatch { axis: "width", .. })
        ));
        assert!(matches!(
            accessor.check_dimensions(4, 3, 9),
            Err(Error::DimensionMismatch { axis: "depth", .. })
        ));
    }

    #[test]
    fn test_structured_description_keeps_original_file() {
        let mut fi = SliceDescriptor::new(4, 3, PixelKind::U16);
        fi.offset = 1024;
        fi.n_planes = 2;
        fi.description = Some(
            "ImageJ=1.52\nimages=2\nchannels=2\noriginalFile=/data/worm.lsm\n\
             detection0=488\ndetection1=520\ndetection2=561\ndetection3=600\n\0"
                .to_owned(),
        );
        let decoded = DecodedFile {
            slices: vec![fi],
            meta: FileMetadata {
                little_endian: true,
                ..FileMetadata::default()
            },
        };
        let accessor = SliceAccessor::from_decoded(PathBuf::from("mem.tif"), decoded).unwrap();
        assert_eq!(
            accessor.metadata().original_file.as_deref(),
            Some("/data/worm.lsm")
        );
        assert_eq!(
            accessor.metadata().channel_info,
            vec![
                ChannelInfo {
                    detection_start: 488.0,
                    detection_end: 520.0,
                },
                ChannelInfo {
                    detection_start: 561.0,
                    detection_end: 600.0,
                },
            ]
        );
        assert_eq!(accessor.n_channels(), 2);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SliceAccessor::open_for_read("/nonexistent/stack.tif"),
            Err(Error::FileNotFound(_))
        ));
    }
}
