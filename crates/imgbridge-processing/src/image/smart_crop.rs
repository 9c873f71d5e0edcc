use image::{DynamicImage, GenericImageView};

pub struct SmartCrop;

impl SmartCrop {
    /// Saliency per pixel: gradient magnitude blended with colour saturation
    fn calculate_saliency_map(img: &DynamicImage) -> Vec<f64> {
        let (width, height) = img.dimensions();
        let gray = img.to_luma8();
        let rgb = img.to_rgb8();

        let mut saliency = vec![0.0f64; width as usize * height as usize];
        for y in 0..height {
            for x in 0..width {
                let px = |x: u32, y: u32| gray.get_pixel(x, y)[0] as f64;
                let right = px((x + 1).min(width - 1), y);
                let left = px(x.saturating_sub(1), y);
                let bottom = px(x, (y + 1).min(height - 1));
                let top = px(x, y.saturating_sub(1));

                let gx = right - left;
                let gy = bottom - top;
                let edge_strength = (gx * gx + gy * gy).sqrt();

                let [r, g, b] = rgb.get_pixel(x, y).0;
                let saturation = (r.max(g).max(b) - r.min(g).min(b)) as f64;

                saliency[(y * width + x) as usize] = edge_strength * 0.6 + saturation * 0.4;
            }
        }
        saliency
    }

    /// Top-left corner of the `target_width` x `target_height` window with the most
    /// saliency; the centred window wins ties.
    ///
    /// The target must fit inside the image.
    pub fn find_window(img: &DynamicImage, target_width: u32, target_height: u32) -> (u32, u32) {
        let (orig_width, orig_height) = img.dimensions();
        let target_width = target_width.min(orig_width);
        let target_height = target_height.min(orig_height);
        if target_width == orig_width && target_height == orig_height {
            return (0, 0);
        }

        let saliency = Self::calculate_saliency_map(img);
        let table = SummedArea::new(&saliency, orig_width as usize, orig_height as usize);

        let max_x = orig_width - target_width;
        let max_y = orig_height - target_height;
        let mut best_x = ((max_x + 1) / 2).min(max_x);
        let mut best_y = ((max_y + 1) / 2).min(max_y);
        let mut best_score = table.window(best_x, best_y, target_width, target_height);

        for y in 0..=max_y {
            for x in 0..=max_x {
                let score = table.window(x, y, target_width, target_height);
                if score > best_score {
                    best_score = score;
                    best_x = x;
                    best_y = y;
                }
            }
        }

        tracing::debug!(
            left = best_x,
            top = best_y,
            score = best_score,
            "Smart crop window selected"
        );
        (best_x, best_y)
    }
}

/// Summed-area table with a zero row and column in front
struct SummedArea {
    sums: Vec<f64>,
    stride: usize,
}

impl SummedArea {
    fn new(values: &[f64], width: usize, height: usize) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row = 0.0;
            for x in 0..width {
                row += values[y * width + x];
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { sums, stride }
    }

    fn window(&self, x: u32, y: u32, width: u32, height: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + width as usize, y0 + height as usize);
        let at = |x: usize, y: usize| self.sums[y * self.stride + x];
        at(x1, y1) - at(x0, y1) - at(x1, y0) + at(x0, y0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_uniform_image_picks_centre() {
        let img =
            DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255])));
        assert_eq!(SmartCrop::find_window(&img, 50, 50), (25, 25));
        assert_eq!(SmartCrop::find_window(&img, 100, 100), (0, 0));
    }

    #[test]
    fn test_window_follows_detail() {
        let mut img = RgbaImage::from_pixel(100, 40, Rgba([128, 128, 128, 255]));
        for y in 10..30 {
            for x in 80..95 {
                img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
            }
        }
        let (left, _) = SmartCrop::find_window(&DynamicImage::ImageRgba8(img), 30, 40);
        assert!((65..=70).contains(&left), "left = {}", left);
    }

    #[test]
    fn test_summed_area_window() {
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();
        let table = SummedArea::new(&values, 4, 3);
        // rows: [0 1 2 3] [4 5 6 7] [8 9 10 11]
        assert_eq!(table.window(1, 1, 2, 2), 5.0 + 6.0 + 9.0 + 10.0);
        assert_eq!(table.window(0, 0, 4, 3), 66.0);
    }
}
