//! Asynchronous sequential plane writer.
//!
//! A fixed pool of two reusable byte buffers cycles between the caller and
//! a single background I/O thread: the caller checks a buffer out, encodes
//! one plane into it, and queues it; the worker writes it to disk and hands
//! the buffer back. With only two buffers in existence the caller blocks as
//! soon as the disk falls two planes behind.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use parking_lot::{Condvar, Mutex};

use crate::tiff::descriptor::{Calibration, PixelBuffer};
use crate::tiff::encoder::{self, OStream, StackLayout};
use crate::tiff::format::PixelKind;
use crate::util::{Error, Result};

const QUEUE_CAPACITY: usize = 2;

enum Job {
    Write(Vec<u8>),
    Stop,
}

struct Shared {
    free: Mutex<VecDeque<Vec<u8>>>,
    free_cv: Condvar,
    pending: Mutex<VecDeque<Job>>,
    pending_cv: Condvar,
    /// First I/O failure seen by the worker; write-once, re-raised on every
    /// subsequent caller operation.
    error: Mutex<Option<String>>,
}

/// Writes planes strictly in order, overlapping encoding with disk I/O.
pub struct SequentialWriter {
    shared: Arc<Shared>,
    stream: Arc<Mutex<OStream>>,
    handle: Option<JoinHandle<()>>,
    layout: StackLayout,
    little_endian: bool,
    pixel_kind: PixelKind,
    width: usize,
    height: usize,
    finished: bool,
}

impl SequentialWriter {
    /// Creates the output file, writes the header and directory, and starts
    /// the background writer.
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        path: impl AsRef<Path>,
        wide: bool,
        little_endian: bool,
        width: usize,
        height: usize,
        pixel_kind: PixelKind,
        description: &str,
        cal: &Calibration,
    ) -> Result<Self> {
        let out = OStream::create(path, little_endian)?;
        Self::begin_with_stream(out, wide, width, height, pixel_kind, description, cal)
    }

    pub(crate) fn begin_with_stream(
        mut out: OStream,
        wide: bool,
        width: usize,
        height: usize,
        pixel_kind: PixelKind,
        description: &str,
        cal: &Calibration,
    ) -> Result<Self> {
        let layout = encoder::plan_layout(wide, width as u32, height as u32, pixel_kind, description)?;
        encoder::write_header(
            &mut out,
            wide,
            width as u32,
            height as u32,
            pixel_kind,
            description,
            cal,
        )?;
        out.flush()?;

        let little_endian = out.is_little_endian();
        let shared = Arc::new(Shared {
            // Buffer allocation is deferred to the first checkout.
            free: Mutex::new(VecDeque::from([Vec::new(), Vec::new()])),
            free_cv: Condvar::new(),
            pending: Mutex::new(VecDeque::new()),
            pending_cv: Condvar::new(),
            error: Mutex::new(None),
        });
        let stream = Arc::new(Mutex::new(out));

        let worker_shared = Arc::clone(&shared);
        let worker_stream = Arc::clone(&stream);
        let handle = std::thread::Builder::new()
            .name("slice-writer".into())
            .spawn(move || worker_loop(&worker_shared, &worker_stream))?;

        Ok(Self {
            shared,
            stream,
            handle: Some(handle),
            layout,
            little_endian,
            pixel_kind,
            width,
            height,
            finished: false,
        })
    }

    /// Byte layout fixed at header time.
    pub fn layout(&self) -> StackLayout {
        self.layout
    }

    /// Encodes one plane and queues it for writing. Blocks while both
    /// buffers are in flight.
    pub fn write_slice(&mut self, pixels: &PixelBuffer) -> Result<()> {
        self.check_error()?;
        let ok = matches!(
            (self.pixel_kind.bytes_per_pixel(), pixels),
            (1, PixelBuffer::U8(_)) | (2, PixelBuffer::U16(_)) | (4, PixelBuffer::F32(_))
        );
        if !ok {
            return Err(Error::other(format!(
                "unimplemented pixel type for writing: {}",
                self.pixel_kind.short_name()
            )));
        }
        if pixels.byte_len() != self.layout.plane_bytes as usize {
            return Err(Error::DimensionMismatch {
                axis: "plane",
                expected: self.layout.plane_bytes as usize,
                actual: pixels.byte_len(),
            });
        }

        let mut buf = self.checkout()?;
        encode_pixels(&mut buf, pixels, self.little_endian);
        self.enqueue(buf);
        Ok(())
    }

    /// Queues one 48-bit RGB plane from three separate channel arrays,
    /// interleaving samples and applying byte order per scanline.
    pub fn write_rgb48(&mut self, red: &[u16], green: &[u16], blue: &[u16]) -> Result<()> {
        self.check_error()?;
        if self.pixel_kind != PixelKind::Rgb48 {
            return Err(Error::other(format!(
                "file is open for {} pixels, not RGB48",
                self.pixel_kind.short_name()
            )));
        }
        let n = self.width * self.height;
        if red.len() != n || green.len() != n || blue.len() != n {
            return Err(Error::DimensionMismatch {
                axis: "plane",
                expected: n,
                actual: red.len().min(green.len()).min(blue.len()),
            });
        }

        let mut buf = self.checkout()?;
        for y in 0..self.height {
            let row = y * self.width;
            for x in 0..self.width {
                let base = (row + x) * 6;
                let line = &mut buf[base..base + 6];
                if self.little_endian {
                    LittleEndian::write_u16(&mut line[0..2], red[row + x]);
                    LittleEndian::write_u16(&mut line[2..4], green[row + x]);
                    LittleEndian::write_u16(&mut line[4..6], blue[row + x]);
                } else {
                    BigEndian::write_u16(&mut line[0..2], red[row + x]);
                    BigEndian::write_u16(&mut line[2..4], green[row + x]);
                    BigEndian::write_u16(&mut line[4..6], blue[row + x]);
                }
            }
        }
        self.enqueue(buf);
        Ok(())
    }

    /// Queues one pre-serialized plane verbatim.
    pub fn dump_buffer(&mut self, bytes: &[u8]) -> Result<()> {
        self.check_error()?;
        if bytes.len() != self.layout.plane_bytes as usize {
            return Err(Error::DimensionMismatch {
                axis: "plane",
                expected: self.layout.plane_bytes as usize,
                actual: bytes.len(),
            });
        }
        let mut buf = self.checkout()?;
        buf.copy_from_slice(bytes);
        self.enqueue(buf);
        Ok(())
    }

    /// Blocks until every queued plane has reached the disk (both buffers
    /// back in the free pool), then re-checks for worker failures.
    pub fn wait_until_idle(&mut self) -> Result<()> {
        self.check_error()?;
        let mut free = self.shared.free.lock();
        while free.len() < QUEUE_CAPACITY {
            if self.shared.error.lock().is_some() {
                break;
            }
            self.shared.free_cv.wait(&mut free);
        }
        drop(free);
        self.check_error()
    }

    /// Drains the queue and pushes buffered bytes to the OS, leaving the
    /// worker running. Lets a reader see every plane written so far.
    pub fn flush(&mut self) -> Result<()> {
        self.wait_until_idle()?;
        self.stream.lock().flush()
    }

    /// Drains the queue, stops the worker, and flushes. Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.wait_until_idle()?;
        self.stop_worker();
        self.check_error()?;
        self.stream.lock().flush()?;
        self.finished = true;
        Ok(())
    }

    /// Finishes with fewer planes than declared: drains, then overwrites
    /// the description in place with one reflecting the true plane count.
    /// A plane count of 1 drops the conditional description lines, so a
    /// shorter replacement is NUL-padded out to the original field length;
    /// nothing after the description may move.
    pub fn finish_early(&mut self, description: &str) -> Result<()> {
        if self.finished {
            return Err(Error::NotWriting("finish_early"));
        }
        self.wait_until_idle()?;
        self.stop_worker();
        self.check_error()?;
        if description.len() > self.layout.description_len {
            return Err(Error::invalid(
                "replacement description longer than the original",
            ));
        }
        let mut patch = description.as_bytes().to_vec();
        patch.resize(self.layout.description_len, 0);
        let mut out = self.stream.lock();
        out.seek(self.layout.description_offset)?;
        out.write_bytes(&patch)?;
        out.seek_end()?;
        out.flush()?;
        drop(out);
        self.finished = true;
        Ok(())
    }

    fn checkout(&self) -> Result<Vec<u8>> {
        let mut free = self.shared.free.lock();
        loop {
            if let Some(mut buf) = free.pop_front() {
                buf.resize(self.layout.plane_bytes as usize, 0);
                return Ok(buf);
            }
            if let Some(msg) = self.shared.error.lock().as_ref() {
                return Err(Error::WriteFailed(msg.clone()));
            }
            self.shared.free_cv.wait(&mut free);
        }
    }

    fn enqueue(&self, buf: Vec<u8>) {
        let mut pending = self.shared.pending.lock();
        pending.push_back(Job::Write(buf));
        drop(pending);
        self.shared.pending_cv.notify_one();
    }

    fn check_error(&self) -> Result<()> {
        if let Some(msg) = self.shared.error.lock().as_ref() {
            return Err(Error::WriteFailed(msg.clone()));
        }
        Ok(())
    }

    fn stop_worker(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let mut pending = self.shared.pending.lock();
            pending.push_back(Job::Stop);
        }
        self.shared.pending_cv.notify_one();
        let _ = handle.join();
    }
}

impl Drop for SequentialWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.stop_worker();
        }
    }
}

fn worker_loop(shared: &Shared, stream: &Mutex<OStream>) {
    loop {
        let job = {
            let mut pending = shared.pending.lock();
            loop {
                if let Some(job) = pending.pop_front() {
                    break job;
                }
                shared.pending_cv.wait(&mut pending);
            }
        };
        let buf = match job {
            Job::Stop => break,
            Job::Write(buf) => buf,
        };

        let res = stream.lock().write_bytes(&buf);

        // Returned buffers go to the front of the free pool.
        {
            let mut free = shared.free.lock();
            free.push_front(buf);
        }
        shared.free_cv.notify_all();

        if let Err(e) = res {
            tracing::error!(error = %e, "background plane write failed");
            let mut slot = shared.error.lock();
            if slot.is_none() {
                *slot = Some(e.to_string());
            }
            drop(slot);
            shared.free_cv.notify_all();
            break;
        }
    }
}

/// Serializes a pixel buffer into `dst` in the file's byte order. When the
/// target order matches the host a plain memory copy suffices.
fn encode_pixels(dst: &mut [u8], pixels: &PixelBuffer, little_endian: bool) {
    match pixels {
        PixelBuffer::U8(v) => dst.copy_from_slice(v),
        PixelBuffer::U16(v) => {
            if little_endian == cfg!(target_endian = "little") {
                dst.copy_from_slice(bytemuck::cast_slice(v));
            } else if little_endian {
                LittleEndian::write_u16_into(v, dst);
            } else {
                BigEndian::write_u16_into(v, dst);
            }
        }
        PixelBuffer::F32(v) => {
            if little_endian == cfg!(target_endian = "little") {
                dst.copy_from_slice(bytemuck::cast_slice(v));
            } else if little_endian {
                LittleEndian::write_f32_into(v, dst);
            } else {
                BigEndian::write_f32_into(v, dst);
            }
        }
    }
}
