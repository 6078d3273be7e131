//! Multi-directory raster container: decoding, random slice access, and
//! sequential writing.
//!
//! ## File structure
//!
//! ```text
//! +--------------------+
//! | Order marker       |  2 bytes ("II" little / "MM" big endian)
//! +--------------------+
//! | Version            |  2 bytes (42 classic / 43 wide)
//! +--------------------+
//! | (wide) offset size |  2 + 2 bytes (8, reserved 0)
//! +--------------------+
//! | First IFD offset   |  4 bytes classic / 8 bytes wide
//! +--------------------+
//! | ... directories,   |
//! |  pixel planes ...  |
//! +--------------------+
//! ```
//!
//! Each image file directory (IFD) is an entry count, fixed-size tagged
//! entries, and the offset of the next directory (0 terminates the chain).

pub mod accessor;
pub mod cache;
pub mod decoder;
pub mod descriptor;
pub mod encoder;
pub mod format;
pub mod lsm;
pub mod metadata;
pub mod writer;

pub use accessor::{SliceAccessor, WriteOptions};
pub use cache::{BufferPool, SliceCache};
pub use decoder::{DecodedFile, TiffDecoder};
pub use descriptor::{
    Calibration, ChannelInfo, FileMetadata, OffsetUnwrap, Palette, PixelBuffer, SliceDescriptor,
    SliceTable,
};
pub use format::{Compression, PixelKind};
pub use metadata::{parse_description, DescriptionProperties};
pub use writer::SequentialWriter;
