//! Sub-pixel corner refinement.
//!
//! Each corner is moved to the point where the weighted image gradients in
//! its neighbourhood are orthogonal to the offsets from that point: the
//! classic saddle/edge-intersection least-squares fit, iterated until the step
//! falls below `epsilon`.

use tracing::trace;

use crate::{
    detector::{Point, Quad},
    geometry::min_area_rect,
};

/// Accepted range for the bounding-rectangle aspect ratio.
const MIN_ASPECT: f64 = 0.1;
const MAX_ASPECT: f64 = 10.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CornerRefiner {
    /// Search window is `2 * half_window + 1` pixels wide.
    pub half_window: usize,
    pub max_iterations: usize,
    /// Convergence threshold on the per-iteration step, in pixels.
    pub epsilon: f64,
}

impl Default for CornerRefiner {
    fn default() -> Self {
        Self {
            half_window: 5,
            max_iterations: 100,
            epsilon: 0.001,
        }
    }
}

impl CornerRefiner {
    /// Distance from the image edge a corner must keep to be refined.
    pub fn margin(&self) -> usize {
        self.half_window + 1
    }

    /// Refine `corners` against the luma plane, preserving their order.
    ///
    /// The input is returned untouched when any corner is too close to the
    /// image edge or when the quad's bounding rectangle is degenerate.
    pub fn refine(&self, luma: &[u8], width: usize, height: usize, corners: Quad) -> Quad {
        if luma.len() != width * height || !self.inside_margin(&corners, width, height) {
            return corners;
        }
        if !plausible_shape(&corners) {
            trace!(?corners, "skipping refinement of implausible quad");
            return corners;
        }

        let image = Plane {
            data: luma,
            width,
            height,
        };
        let mask = self.gaussian_mask();
        corners.map(|corner| self.refine_point(&image, &mask, corner))
    }

    fn inside_margin(&self, corners: &Quad, width: usize, height: usize) -> bool {
        let margin = self.margin() as f32;
        let max_x = width as f32 - 1.0 - margin;
        let max_y = height as f32 - 1.0 - margin;
        corners.iter().all(|&[x, y]| {
            x.is_finite() && y.is_finite() && x >= margin && y >= margin && x <= max_x && y <= max_y
        })
    }

    fn gaussian_mask(&self) -> Vec<f64> {
        let hw = self.half_window as isize;
        let side = 2 * self.half_window + 1;
        let scale = (self.half_window.max(1) as f64).powi(2);
        let mut mask = Vec::with_capacity(side * side);
        for i in -hw..=hw {
            for j in -hw..=hw {
                let wy = (-((i * i) as f64) / scale).exp();
                let wx = (-((j * j) as f64) / scale).exp();
                mask.push(wy * wx);
            }
        }
        mask
    }

    fn refine_point(&self, image: &Plane<'_>, mask: &[f64], start: Point) -> Point {
        let hw = self.half_window as isize;
        let side = 2 * self.half_window + 1;
        let eps2 = self.epsilon * self.epsilon;
        let origin = [start[0] as f64, start[1] as f64];
        let mut current = origin;

        for _ in 0..self.max_iterations {
            let (mut a, mut b, mut c, mut bb1, mut bb2) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for i in -hw..=hw {
                for j in -hw..=hw {
                    let m = mask[((i + hw) as usize) * side + (j + hw) as usize];
                    let (px, py) = (j as f64, i as f64);
                    let (x, y) = (current[0] + px, current[1] + py);
                    let gx = image.sample(x + 1.0, y) - image.sample(x - 1.0, y);
                    let gy = image.sample(x, y + 1.0) - image.sample(x, y - 1.0);
                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    a += gxx;
                    b += gxy;
                    c += gyy;
                    bb1 += gxx * px + gxy * py;
                    bb2 += gxy * px + gyy * py;
                }
            }

            let det = a * c - b * b;
            if det.abs() <= eps2 {
                break;
            }
            let scale = 1.0 / det;
            let next = [
                current[0] + c * scale * bb1 - b * scale * bb2,
                current[1] - b * scale * bb1 + a * scale * bb2,
            ];
            let step = (next[0] - current[0]).powi(2) + (next[1] - current[1]).powi(2);
            current = next;
            if !image.contains(current) || step <= eps2 {
                break;
            }
        }

        let hw = self.half_window as f64;
        if (current[0] - origin[0]).abs() > hw
            || (current[1] - origin[1]).abs() > hw
            || !current[0].is_finite()
            || !current[1].is_finite()
        {
            return start;
        }
        [current[0] as f32, current[1] as f32]
    }
}

fn plausible_shape(corners: &Quad) -> bool {
    let (w, h) = min_area_rect(corners);
    if w <= 0.0 || h <= 0.0 {
        return false;
    }
    let aspect = w / h;
    (MIN_ASPECT..=MAX_ASPECT).contains(&aspect)
}

struct Plane<'a> {
    data: &'a [u8],
    width: usize,
    height: usize,
}

impl Plane<'_> {
    fn contains(&self, p: [f64; 2]) -> bool {
        p[0] >= 0.0 && p[1] >= 0.0 && p[0] < self.width as f64 && p[1] < self.height as f64
    }

    fn at(&self, x: isize, y: isize) -> f64 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.data[y * self.width + x] as f64
    }

    /// Bilinear sample, replicating the border.
    fn sample(&self, x: f64, y: f64) -> f64 {
        let x0 = x.floor();
        let y0 = y.floor();
        let (fx, fy) = (x - x0, y - y0);
        let (ix, iy) = (x0 as isize, y0 as isize);
        let top = self.at(ix, iy) * (1.0 - fx) + self.at(ix + 1, iy) * fx;
        let bottom = self.at(ix, iy + 1) * (1.0 - fx) + self.at(ix + 1, iy + 1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: usize = 100;

    /// Dark square covering pixels 30..=69 on a white background.
    fn square_image() -> Vec<u8> {
        let mut luma = vec![255u8; SIZE * SIZE];
        for y in 30..70 {
            for x in 30..70 {
                luma[y * SIZE + x] = 0;
            }
        }
        luma
    }

    fn close(a: Point, b: Point, tol: f32) -> bool {
        (a[0] - b[0]).abs() <= tol && (a[1] - b[1]).abs() <= tol
    }

    #[test]
    fn corners_near_edge_are_returned_untouched() {
        let luma = square_image();
        let corners = [[3.0, 40.0], [60.0, 40.0], [60.0, 60.0], [40.0, 60.0]];
        let refined = CornerRefiner::default().refine(&luma, SIZE, SIZE, corners);
        assert_eq!(refined, corners);

        let corners = [[40.0, 40.0], [60.0, 40.0], [60.0, 96.5], [40.0, 60.0]];
        let refined = CornerRefiner::default().refine(&luma, SIZE, SIZE, corners);
        assert_eq!(refined, corners);
    }

    #[test]
    fn rough_corners_snap_to_square_outline() {
        let luma = square_image();
        let guesses = [[31.0, 32.0], [68.0, 31.0], [71.0, 68.0], [32.0, 71.0]];
        let expected = [[29.5, 29.5], [69.5, 29.5], [69.5, 69.5], [29.5, 69.5]];
        let refined = CornerRefiner::default().refine(&luma, SIZE, SIZE, guesses);
        for (got, want) in refined.iter().zip(expected) {
            assert!(close(*got, want, 0.5), "{got:?} vs {want:?}");
        }
    }

    #[test]
    fn order_is_preserved() {
        let luma = square_image();
        let guesses = [[71.0, 68.0], [31.0, 32.0], [32.0, 71.0], [68.0, 31.0]];
        let refined = CornerRefiner::default().refine(&luma, SIZE, SIZE, guesses);
        assert!(close(refined[0], [69.5, 69.5], 0.5));
        assert!(close(refined[1], [29.5, 29.5], 0.5));
        assert!(close(refined[2], [29.5, 69.5], 0.5));
        assert!(close(refined[3], [69.5, 29.5], 0.5));
    }

    #[test]
    fn sliver_quads_are_not_refined() {
        let luma = square_image();
        let sliver = [[30.0, 30.0], [70.0, 30.0], [70.0, 31.0], [30.0, 31.0]];
        assert_eq!(CornerRefiner::default().refine(&luma, SIZE, SIZE, sliver), sliver);

        let collinear = [[30.0, 30.0], [40.0, 40.0], [50.0, 50.0], [60.0, 60.0]];
        assert_eq!(
            CornerRefiner::default().refine(&luma, SIZE, SIZE, collinear),
            collinear
        );
    }

    #[test]
    fn flat_neighbourhood_keeps_the_guess() {
        let luma = vec![200u8; SIZE * SIZE];
        let corners = [[20.0, 20.0], [80.0, 20.0], [80.0, 80.0], [20.0, 80.0]];
        assert_eq!(CornerRefiner::default().refine(&luma, SIZE, SIZE, corners), corners);
    }
}
