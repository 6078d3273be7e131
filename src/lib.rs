//! # tiffstack
//!
//! Reader and sequential writer for multi-slice raster stacks stored in
//! classic (32-bit offset) and wide (64-bit offset) tagged container files,
//! including the vendor microscopy flavor and its metadata side channels.
//!
//! ## Modules
//!
//! - [`util`] - Errors and shared helpers
//! - [`tiff`] - Directory decoding, slice access, sequential writing
//!
//! ## Example
//!
//! ```ignore
//! use tiffstack::SliceAccessor;
//!
//! let stack = SliceAccessor::open_for_read("cells.tif")?;
//! for i in 0..stack.n_slices() {
//!     let plane = stack.get_slice(i, true)?;
//!     println!("slice {i}: {} samples", plane.len());
//! }
//! ```

pub mod tiff;
pub mod util;

// Re-export commonly used types
pub use tiff::{
    Calibration, ChannelInfo, Compression, FileMetadata, PixelBuffer, PixelKind, SliceAccessor,
    SliceDescriptor, TiffDecoder, WriteOptions,
};
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::tiff::{
        Calibration, PixelBuffer, PixelKind, SequentialWriter, SliceAccessor, TiffDecoder,
        WriteOptions,
    };
    pub use crate::util::{Error, Result};
}
