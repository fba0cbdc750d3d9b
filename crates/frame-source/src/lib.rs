//! FrameForge Frame Sources
//!
//! Turns a video file into a lazy, one-pass sequence of timestamped frames:
//! - **Y4M:** built-in decoder for uncompressed YUV4MPEG2 streams
//! - **ffmpeg:** any container/codec ffmpeg understands, decoded in a child process
//! - **Synthetic:** procedural clips with injectable freezes, gaps and blur
//!
//! [`open_source`] picks the decoder by sniffing the file.

pub mod ffmpeg;
pub mod frame;
pub mod source;
pub mod synthetic;
pub mod y4m;

pub use frame::{Frame, PixelFormat, SourceMetadata};
pub use source::{open_source, probe_metadata, BoxedFrameSource, FrameSource};
pub use synthetic::{SyntheticClip, SyntheticSource};
pub use y4m::{Y4mSource, Y4mWriter};
