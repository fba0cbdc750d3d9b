//! Write synthetic clips with known defects.

use std::ops::Range;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;

use frameforge_frame_source::{SyntheticClip, Y4mWriter};

#[derive(Debug, Clone)]
pub struct GenerateArgs {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub frames: u64,
    pub freeze: Vec<Range<u64>>,
    pub blur: Vec<Range<u64>>,
    pub blur_sigma: f32,
    pub static_scene: bool,
}

impl GenerateArgs {
    fn clip(&self) -> SyntheticClip {
        let mut clip = SyntheticClip::new(self.width, self.height, self.fps, self.frames);
        if self.static_scene {
            clip = clip.static_scene();
        }
        for range in &self.freeze {
            clip = clip.freeze(range.clone());
        }
        for range in &self.blur {
            clip = clip.blur(range.clone(), self.blur_sigma);
        }
        clip
    }
}

pub fn run(args: GenerateArgs) -> anyhow::Result<ExitCode> {
    anyhow::ensure!(
        args.width >= 16 && args.height >= 16,
        "clip must be at least 16x16"
    );
    anyhow::ensure!(args.fps > 0.0, "fps must be positive");

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let mut writer = Y4mWriter::create(&args.output, args.width, args.height, args.fps)?;
    for frame in args.clip().into_source() {
        writer.write_frame(&frame?)?;
    }
    let frames = writer.finish()?;

    println!(
        "Wrote {} ({}x{} @ {} fps, {frames} frames, {} freeze(s), {} blur range(s))",
        args.output.display(),
        args.width,
        args.height,
        args.fps,
        args.freeze.len(),
        args.blur.len()
    );
    Ok(ExitCode::SUCCESS)
}
