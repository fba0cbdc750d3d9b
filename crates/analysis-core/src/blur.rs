//! Sharpness and brightness of a luma frame.

use image::GrayImage;

/// Population variance of the 4-neighbour Laplacian over interior pixels.
///
/// Sharp frames have strong second derivatives and a high variance; defocus
/// and motion blur flatten them. Frames smaller than 3×3 score 0.
pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let width = image.width() as usize;
    let height = image.height() as usize;
    if width < 3 || height < 3 {
        return 0.0;
    }

    let data = image.as_raw();
    let at = |x: usize, y: usize| data[y * width + x] as f64;

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let lap = at(x - 1, y) + at(x + 1, y) + at(x, y - 1) + at(x, y + 1) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

/// Mean luma, 0–255.
pub fn mean_brightness(image: &GrayImage) -> f64 {
    let data = image.as_raw();
    if data.is_empty() {
        return 0.0;
    }
    data.iter().map(|&v| v as u64).sum::<u64>() as f64 / data.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_flat_frame_has_zero_variance() {
        let flat = GrayImage::from_pixel(16, 16, Luma([200]));
        assert_eq!(laplacian_variance(&flat), 0.0);
        assert_eq!(mean_brightness(&flat), 200.0);
    }

    #[test]
    fn test_checkerboard_is_sharper_than_ramp() {
        let checker = GrayImage::from_fn(16, 16, |x, y| Luma([if (x + y) % 2 == 0 { 0 } else { 255 }]));
        let ramp = GrayImage::from_fn(16, 16, |x, _| Luma([(x * 16) as u8]));
        assert!(laplacian_variance(&checker) > laplacian_variance(&ramp));
        assert_eq!(laplacian_variance(&ramp), 0.0);
    }

    #[test]
    fn test_tiny_frame_scores_zero() {
        assert_eq!(laplacian_variance(&GrayImage::new(2, 2)), 0.0);
    }
}
