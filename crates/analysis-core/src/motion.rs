//! Sparse-grid pyramidal Lucas–Kanade optical flow.
//!
//! # Algorithm
//!
//! 1. **Pyramid** each luma frame (intensities scaled to [0, 1]) by repeated
//!    2×2 averaging.
//! 2. **Grid**: pick points every `grid_step` px on the finest level, away
//!    from the border.
//! 3. **Texture gate**: skip points whose structure tensor has a small minimum
//!    eigenvalue; their flow is unconstrained.
//! 4. **Track** each point coarse-to-fine with Gauss–Newton iterations,
//!    doubling the guess between levels.
//! 5. **Score**: mean flow magnitude over the tracked points.

use image::GrayImage;

/// Flow solver parameters.
#[derive(Debug, Clone, Copy)]
pub struct FlowParams {
    pub pyramid_levels: usize,
    pub grid_step: u32,
    pub window_radius: u32,
    pub max_iterations: u32,
    pub min_eigenvalue: f64,
}

/// Iterations stop once an update is smaller than this (px).
const CONVERGENCE_EPSILON: f32 = 0.01;

/// Coarsest pyramid level kept must be at least this size.
const MIN_LEVEL_SIZE: usize = 8;

/// One pyramid level: a float luma plane.
#[derive(Debug, Clone)]
struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    fn from_gray(image: &GrayImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().iter().map(|&v| v as f32 / 255.0).collect(),
        }
    }

    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear sample with clamp-to-edge addressing.
    fn sample(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);

        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let top = self.at(x0, y0) * (1.0 - fx) + self.at(x1, y0) * fx;
        let bottom = self.at(x0, y1) * (1.0 - fx) + self.at(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    fn downsample(&self) -> Self {
        let width = self.width / 2;
        let height = self.height / 2;
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (2 * x, 2 * y);
                data.push(
                    (self.at(sx, sy)
                        + self.at(sx + 1, sy)
                        + self.at(sx, sy + 1)
                        + self.at(sx + 1, sy + 1))
                        * 0.25,
                );
            }
        }
        Self {
            width,
            height,
            data,
        }
    }
}

/// A luma frame prepared for flow: finest level first.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<Plane>,
}

impl Pyramid {
    pub fn build(image: &GrayImage, levels: usize) -> Self {
        let mut planes = vec![Plane::from_gray(image)];
        while planes.len() < levels.max(1) {
            let Some(last) = planes.last() else {
                break;
            };
            if last.width / 2 < MIN_LEVEL_SIZE || last.height / 2 < MIN_LEVEL_SIZE {
                break;
            }
            let next = last.downsample();
            planes.push(next);
        }
        Self { levels: planes }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.levels[0].width, self.levels[0].height)
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Mean flow magnitude (finest-level px) from `prev` to `next`.
///
/// Returns `None` when the pyramids differ in shape or no grid point has
/// enough texture to be tracked.
pub fn mean_flow_magnitude(prev: &Pyramid, next: &Pyramid, params: &FlowParams) -> Option<f64> {
    if prev.dimensions() != next.dimensions() {
        return None;
    }
    let depth = prev.depth().min(next.depth());
    let (width, height) = prev.dimensions();
    let radius = params.window_radius.max(1) as usize;
    let step = params.grid_step.max(1) as usize;
    let margin = radius + 1;
    if width <= 2 * margin || height <= 2 * margin {
        return None;
    }

    let mut total = 0.0f64;
    let mut tracked = 0usize;

    let mut y = margin;
    while y < height - margin {
        let mut x = margin;
        while x < width - margin {
            if let Some((dx, dy)) = track_point(prev, next, depth, x as f32, y as f32, radius, params)
            {
                total += ((dx * dx + dy * dy) as f64).sqrt();
                tracked += 1;
            }
            x += step;
        }
        y += step;
    }

    (tracked > 0).then(|| total / tracked as f64)
}

fn track_point(
    prev: &Pyramid,
    next: &Pyramid,
    depth: usize,
    x: f32,
    y: f32,
    radius: usize,
    params: &FlowParams,
) -> Option<(f32, f32)> {
    let mut guess = (0.0f32, 0.0f32);

    for level in (0..depth).rev() {
        let scale = (1usize << level) as f32;
        let px = x / scale;
        let py = y / scale;
        let i_plane = &prev.levels[level];
        let j_plane = &next.levels[level];

        let window = window_gradients(i_plane, px, py, radius);
        let (gxx, gxy, gyy) = window.tensor;
        let det = gxx * gyy - gxy * gxy;
        if det.abs() < 1e-12 {
            return None;
        }

        if level == 0 {
            let n = window.samples.len() as f64;
            let trace = (gxx + gyy) as f64;
            let diff = ((gxx - gyy) as f64).powi(2) + 4.0 * (gxy as f64).powi(2);
            let min_eig = 0.5 * (trace - diff.sqrt());
            if min_eig / n < params.min_eigenvalue {
                return None;
            }
        }

        let mut v = (0.0f32, 0.0f32);
        for _ in 0..params.max_iterations.max(1) {
            let mut bx = 0.0f32;
            let mut by = 0.0f32;
            for s in &window.samples {
                let j = j_plane.sample(s.x + guess.0 + v.0, s.y + guess.1 + v.1);
                let err = s.value - j;
                bx += err * s.ix;
                by += err * s.iy;
            }
            let ex = (gyy * bx - gxy * by) / det;
            let ey = (gxx * by - gxy * bx) / det;
            v.0 += ex;
            v.1 += ey;
            if ex * ex + ey * ey < CONVERGENCE_EPSILON * CONVERGENCE_EPSILON {
                break;
            }
        }

        let flow = (guess.0 + v.0, guess.1 + v.1);
        if !flow.0.is_finite() || !flow.1.is_finite() {
            return None;
        }
        guess = if level == 0 {
            flow
        } else {
            (2.0 * flow.0, 2.0 * flow.1)
        };
    }

    Some(guess)
}

struct WindowSample {
    x: f32,
    y: f32,
    value: f32,
    ix: f32,
    iy: f32,
}

struct Window {
    samples: Vec<WindowSample>,
    /// (Σ Ix², Σ IxIy, Σ Iy²)
    tensor: (f32, f32, f32),
}

fn window_gradients(plane: &Plane, cx: f32, cy: f32, radius: usize) -> Window {
    let r = radius as i32;
    let mut samples = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);
    let mut tensor = (0.0f32, 0.0f32, 0.0f32);

    for dy in -r..=r {
        for dx in -r..=r {
            let x = cx + dx as f32;
            let y = cy + dy as f32;
            let ix = (plane.sample(x + 1.0, y) - plane.sample(x - 1.0, y)) * 0.5;
            let iy = (plane.sample(x, y + 1.0) - plane.sample(x, y - 1.0)) * 0.5;
            tensor.0 += ix * ix;
            tensor.1 += ix * iy;
            tensor.2 += iy * iy;
            samples.push(WindowSample {
                x,
                y,
                value: plane.sample(x, y),
                ix,
                iy,
            });
        }
    }

    Window { samples, tensor }
}
