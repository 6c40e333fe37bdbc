//! The byte-channel subsystem: per-channel options, the two directional
//! channel halves, and the unified seekable façade built on top of them
//! (spec §4.4–§4.6).

pub mod option;
pub mod read;
pub mod seekable;
pub mod write;

pub use option::{OpenOption, OpenOptionSet};
pub use read::ReadAheadChannel;
pub use seekable::{OpenMode, OpenSpec, SeekableChannel};
pub use write::WritableChannel;
