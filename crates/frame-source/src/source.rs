//! The frame source contract and decoder selection.

use std::io::Read;
use std::path::Path;

use frameforge_common::error::{FrameforgeError, FrameforgeResult};

use crate::ffmpeg::FfmpegSource;
use crate::frame::{Frame, PixelFormat, SourceMetadata};
use crate::y4m::{Y4mSource, Y4M_MAGIC};

/// A lazy, finite, one-pass sequence of frames in increasing timestamp order.
///
/// Sources are not restartable: a second pass opens the file again.
/// Decoding failures are yielded as `Err` items; iteration should stop at
/// the first one.
pub trait FrameSource: Iterator<Item = FrameforgeResult<Frame>> + Send {
    /// Stream description, available before the first frame is read.
    fn metadata(&self) -> &SourceMetadata;
}

pub type BoxedFrameSource = Box<dyn FrameSource>;

/// Open `path` with the decoder its contents call for, producing frames in
/// `format`.
pub fn open_source(path: &Path, format: PixelFormat) -> FrameforgeResult<BoxedFrameSource> {
    match sniff(path)? {
        Container::Y4m => {
            tracing::debug!(path = %path.display(), "Opening Y4M source");
            Ok(Box::new(Y4mSource::open(path, format)?))
        }
        Container::Other => {
            tracing::debug!(path = %path.display(), "Opening ffmpeg source");
            Ok(Box::new(FfmpegSource::open(path, format)?))
        }
    }
}

/// Read stream metadata without decoding any frames.
pub fn probe_metadata(path: &Path) -> FrameforgeResult<SourceMetadata> {
    match sniff(path)? {
        Container::Y4m => Ok(Y4mSource::open(path, PixelFormat::Gray8)?.metadata().clone()),
        Container::Other => crate::ffmpeg::probe(path),
    }
}

enum Container {
    Y4m,
    Other,
}

fn sniff(path: &Path) -> FrameforgeResult<Container> {
    if !path.exists() {
        return Err(FrameforgeError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = std::fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Err(FrameforgeError::decode_at(
            format!("{} is empty", path.display()),
            Some(0),
            None,
        ));
    }

    let mut head = [0u8; 10];
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    if &head[..filled] == Y4M_MAGIC {
        Ok(Container::Y4m)
    } else {
        Ok(Container::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("frameforge-source-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_empty_file_is_decode_error_at_offset_zero() {
        let path = temp_path("empty.mp4");
        std::fs::write(&path, b"").unwrap();

        match open_source(&path, PixelFormat::Gray8) {
            Err(FrameforgeError::Decode { byte_offset, .. }) => assert_eq!(byte_offset, Some(0)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("empty file must not open"),
        }
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let path = temp_path("does-not-exist.mp4");
        assert!(matches!(
            open_source(&path, PixelFormat::Gray8),
            Err(FrameforgeError::FileNotFound { .. })
        ));
    }
}
