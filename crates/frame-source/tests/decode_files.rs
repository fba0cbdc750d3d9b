use std::path::PathBuf;
use std::process::Command;

use frameforge_common::error::FrameforgeError;
use frameforge_frame_source::ffmpeg::command_exists;
use frameforge_frame_source::{open_source, probe_metadata, PixelFormat, SyntheticClip, Y4mWriter};

fn temp_dir(test: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("frameforge-decode-{}-{test}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_clip(path: &PathBuf, clip: SyntheticClip) -> u64 {
    let mut source = clip.clone().into_source();
    let mut writer = Y4mWriter::create(path, clip.width, clip.height, clip.fps).unwrap();
    for frame in &mut source {
        writer.write_frame(&frame.unwrap()).unwrap();
    }
    writer.finish().unwrap()
}

#[test]
fn y4m_file_is_sniffed_and_decoded_losslessly() {
    let dir = temp_dir("y4m");
    let path = dir.join("clip.y4m");
    let clip = SyntheticClip::new(64, 48, 25.0, 12);
    assert_eq!(write_clip(&path, clip.clone()), 12);

    let source = open_source(&path, PixelFormat::Gray8).unwrap();
    assert_eq!(source.metadata().decoder, "y4m");
    assert_eq!(source.metadata().nominal_fps, Some(25.0));

    let decoded: Vec<_> = source.map(|f| f.unwrap()).collect();
    let expected: Vec<_> = clip.into_source().map(|f| f.unwrap()).collect();
    assert_eq!(decoded.len(), expected.len());
    for (got, want) in decoded.iter().zip(&expected) {
        assert_eq!(got.pixels, want.pixels);
        assert!((got.timestamp - want.timestamp).abs() < 1e-9);
    }

    let meta = probe_metadata(&path).unwrap();
    assert_eq!(meta.total_frames, Some(12));
}

#[test]
fn text_file_fails_with_decode_error() {
    let dir = temp_dir("text");
    let path = dir.join("notes.mp4");
    std::fs::write(&path, "this is not a video\n").unwrap();

    let result = open_source(&path, PixelFormat::Gray8).and_then(|mut source| match source.next() {
        Some(Err(e)) => Err(e),
        _ => Ok(()),
    });
    assert!(
        matches!(result, Err(FrameforgeError::Decode { .. })),
        "expected decode error, got {result:?}"
    );
}

#[test]
fn ffmpeg_backend_decodes_encoded_clip() {
    if !command_exists("ffmpeg") || !command_exists("ffprobe") {
        eprintln!("skipping: ffmpeg/ffprobe not on PATH");
        return;
    }

    let dir = temp_dir("ffmpeg");
    let y4m = dir.join("clip.y4m");
    let mkv = dir.join("clip.mkv");
    write_clip(&y4m, SyntheticClip::new(64, 48, 30.0, 20));

    let status = Command::new("ffmpeg")
        .args(["-v", "error", "-y", "-i"])
        .arg(&y4m)
        .args(["-c:v", "ffv1"])
        .arg(&mkv)
        .status()
        .unwrap();
    assert!(status.success());

    let source = open_source(&mkv, PixelFormat::Rgb8).unwrap();
    assert_eq!(source.metadata().decoder, "ffmpeg");
    assert_eq!((source.metadata().width, source.metadata().height), (64, 48));

    let frames: Vec<_> = source.map(|f| f.unwrap()).collect();
    assert_eq!(frames.len(), 20);
    assert_eq!(frames[0].timestamp, 0.0);
    assert!(frames.windows(2).all(|w| w[1].timestamp > w[0].timestamp));
    assert!(frames.iter().all(|f| f.is_consistent()));
}
