//! Check system capabilities.

use std::process::ExitCode;

use frameforge_common::config::config_file_path;
use frameforge_frame_source::ffmpeg::command_exists;

pub fn run() -> anyhow::Result<ExitCode> {
    println!("FrameForge System Check");
    println!("{}", "=".repeat(50));

    println!("[OK] Y4M decoding: built in");

    let ffmpeg = command_exists("ffmpeg");
    let ffprobe = command_exists("ffprobe");
    if ffmpeg {
        println!("[OK] ffmpeg: found (container decoding, annotated export)");
    } else {
        println!("[WARN] ffmpeg: not found");
        println!("       Only .y4m input can be analyzed and --annotate will fail.");
    }
    if ffprobe {
        println!("[OK] ffprobe: found (stream metadata, timestamps)");
    } else {
        println!("[WARN] ffprobe: not found");
        println!("       Container files cannot be probed.");
    }

    let config_path = config_file_path();
    if config_path.exists() {
        println!("[OK] Config: {}", config_path.display());
    } else {
        println!("[OK] Config: defaults ({} not present)", config_path.display());
    }

    println!();
    if ffmpeg && ffprobe {
        println!("All decoders are available. FrameForge is ready.");
    } else {
        println!("Install ffmpeg to analyze MP4, MKV, MOV and other containers.");
    }

    Ok(ExitCode::SUCCESS)
}
