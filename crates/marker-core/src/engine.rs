//! Square fiducial engine shared by the built-in backends.
//!
//! Dark connected components are fitted with a quadrilateral, the quad is
//! resampled as a `grid x grid` cell pattern, and the pattern is decoded:
//!
//! - the outer ring of cells is the dark border;
//! - the payload's four corner cells fix orientation (marker top-left white,
//!   the other three dark);
//! - the remaining payload cells carry the id, its complement and an optional
//!   parity bit, read row-major.

use tracing::trace;

use crate::{
    detector::{BackendInitError, DetectError, Point, Quad},
    geometry::signed_area,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    /// Fixed binarization threshold; `None` picks one per frame.
    pub threshold: Option<u8>,
    /// Smallest marker side, in pixels, worth decoding.
    pub min_side: usize,
    /// Minimum luma difference between border and payload whites.
    pub min_contrast: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold: None,
            min_side: 12,
            min_contrast: 30,
        }
    }
}

/// Cell layout of one marker family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SquareCode {
    /// Cells per side, border included.
    pub grid: usize,
    pub id_bits: u32,
    pub parity: bool,
}

pub const BOARD_CODE: SquareCode = SquareCode {
    grid: 6,
    id_bits: 6,
    parity: false,
};

pub const TAG_CODE: SquareCode = SquareCode {
    grid: 7,
    id_bits: 10,
    parity: true,
};

impl SquareCode {
    pub fn payload(&self) -> usize {
        self.grid - 2
    }

    pub fn max_id(&self) -> u32 {
        (1 << self.id_bits) - 1
    }

    fn is_orientation_cell(&self, r: usize, c: usize) -> bool {
        let last = self.payload() - 1;
        (r == 0 || r == last) && (c == 0 || c == last)
    }

    fn data_cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let p = self.payload();
        (0..p)
            .flat_map(move |r| (0..p).map(move |c| (r, c)))
            .filter(|&(r, c)| !self.is_orientation_cell(r, c))
    }

    fn bits_for(&self, id: u32) -> Vec<bool> {
        let mut bits = Vec::with_capacity(self.id_bits as usize * 2 + 1);
        for shift in (0..self.id_bits).rev() {
            bits.push((id >> shift) & 1 == 1);
        }
        for shift in (0..self.id_bits).rev() {
            bits.push((id >> shift) & 1 == 0);
        }
        if self.parity {
            bits.push(id.count_ones() % 2 == 1);
        }
        bits
    }

    /// Cell pattern for `id`, row-major over the whole grid, `true` = white.
    pub fn encode(&self, id: u32) -> Option<Vec<bool>> {
        if id > self.max_id() {
            return None;
        }
        let g = self.grid;
        let last = self.payload() - 1;
        let mut cells = vec![false; g * g];
        cells[g + 1] = true;

        let bits = self.bits_for(id);
        let mut bits = bits.into_iter();
        for (r, c) in self.data_cells() {
            cells[(r + 1) * g + c + 1] = bits.next().unwrap_or(false);
        }
        debug_assert!(!cells[g + last + 1]);
        Some(cells)
    }

    fn decode(&self, bits: &[bool]) -> Option<u32> {
        let n = self.id_bits as usize;
        if bits.len() < 2 * n + usize::from(self.parity) {
            return None;
        }
        let id = bits[..n]
            .iter()
            .fold(0u32, |acc, &bit| (acc << 1) | u32::from(bit));
        let complement_ok = bits[n..2 * n]
            .iter()
            .zip(&bits[..n])
            .all(|(a, b)| a != b);
        if !complement_ok {
            return None;
        }
        if self.parity && bits[2 * n] != (id.count_ones() % 2 == 1) {
            return None;
        }
        if bits[2 * n + usize::from(self.parity)..].iter().any(|&b| b) {
            return None;
        }
        Some(id)
    }
}

/// A decoded square marker.
#[derive(Clone, Debug, PartialEq)]
pub struct SquareCandidate {
    pub id: u32,
    /// Quarter turns between the image top-left and the marker top-left.
    pub rotation: usize,
    /// Mean normalized cell contrast in `[0, 1]`.
    pub confidence: f32,
    /// Marker-space corners: top-left, top-right, bottom-right, bottom-left.
    pub corners: Quad,
}

/// Per-process detection state sized to the frame geometry.
pub struct SquareTracker {
    width: usize,
    height: usize,
    config: EngineConfig,
    labels: Vec<u32>,
    stack: Vec<usize>,
    component: Vec<usize>,
}

impl SquareTracker {
    pub fn new(width: usize, height: usize, config: EngineConfig) -> Result<Self, BackendInitError> {
        if width == 0 || height == 0 || width.checked_mul(height).is_none() {
            return Err(BackendInitError::InvalidFrameSize { width, height });
        }
        Ok(Self {
            width,
            height,
            config,
            labels: vec![0; width * height],
            stack: Vec::new(),
            component: Vec::new(),
        })
    }

    /// Find every marker of family `code` in a luma plane.
    /// Candidates come back in raster order of their top-most dark pixel.
    pub fn find(
        &mut self,
        luma: &[u8],
        width: usize,
        height: usize,
        code: &SquareCode,
    ) -> Result<Vec<SquareCandidate>, DetectError> {
        if (width, height) != (self.width, self.height) {
            return Err(DetectError::Dimensions {
                expected_width: self.width,
                expected_height: self.height,
                width,
                height,
            });
        }
        if luma.len() != width * height {
            return Err(DetectError::BufferSize {
                expected: width * height,
                actual: luma.len(),
            });
        }

        let Some(threshold) = self.threshold(luma) else {
            return Ok(Vec::new());
        };

        self.labels.fill(0);
        let mut next_label = 1u32;
        let mut found = Vec::new();

        for seed in 0..luma.len() {
            if luma[seed] >= threshold || self.labels[seed] != 0 {
                continue;
            }
            let bbox = self.flood(luma, seed, threshold, next_label);
            next_label = next_label.wrapping_add(1).max(1);

            if !self.plausible_component(&bbox) {
                continue;
            }
            let Some(quad) = fit_quad(&self.component, width, self.config.min_side) else {
                continue;
            };
            if let Some(candidate) = decode_quad(luma, width, height, &quad, code, &self.config) {
                trace!(
                    id = candidate.id,
                    rotation = candidate.rotation,
                    "decoded square marker"
                );
                found.push(candidate);
            }
        }

        Ok(found)
    }

    fn threshold(&self, luma: &[u8]) -> Option<u8> {
        let (min, max) = luma
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        if max.saturating_sub(min) < self.config.min_contrast {
            return None;
        }
        Some(
            self.config
                .threshold
                .unwrap_or(((min as u16 + max as u16) / 2) as u8),
        )
    }

    /// 4-connected flood fill of dark pixels from `seed`; fills `self.component`.
    fn flood(&mut self, luma: &[u8], seed: usize, threshold: u8, label: u32) -> ComponentBox {
        let w = self.width;
        let h = self.height;
        self.component.clear();
        self.stack.clear();
        self.labels[seed] = label;
        self.stack.push(seed);

        let mut bbox = ComponentBox {
            min_x: usize::MAX,
            min_y: usize::MAX,
            max_x: 0,
            max_y: 0,
        };

        while let Some(idx) = self.stack.pop() {
            self.component.push(idx);
            let (x, y) = (idx % w, idx / w);
            bbox.min_x = bbox.min_x.min(x);
            bbox.max_x = bbox.max_x.max(x);
            bbox.min_y = bbox.min_y.min(y);
            bbox.max_y = bbox.max_y.max(y);

            let mut visit = |n: usize| {
                if luma[n] < threshold && self.labels[n] == 0 {
                    self.labels[n] = label;
                    self.stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        bbox
    }

    fn plausible_component(&self, bbox: &ComponentBox) -> bool {
        if bbox.min_x == 0
            || bbox.min_y == 0
            || bbox.max_x + 1 >= self.width
            || bbox.max_y + 1 >= self.height
        {
            return false;
        }
        let bw = bbox.max_x - bbox.min_x + 1;
        let bh = bbox.max_y - bbox.min_y + 1;
        let min_side = self.config.min_side;
        bw >= min_side && bh >= min_side && bw <= bh * 4 && bh <= bw * 4
    }
}

struct ComponentBox {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

/// Fit a quad to a component by farthest-point search. Corners come back in
/// image order (top-left first, clockwise on screen) on pixel boundaries.
fn fit_quad(pixels: &[usize], width: usize, min_side: usize) -> Option<Quad> {
    if pixels.len() < 4 {
        return None;
    }
    let point = |idx: usize| [(idx % width) as f64, (idx / width) as f64];

    let n = pixels.len() as f64;
    let (sx, sy) = pixels.iter().fold((0.0, 0.0), |(sx, sy), &idx| {
        let p = point(idx);
        (sx + p[0], sy + p[1])
    });
    let centroid = [sx / n, sy / n];

    let farthest_from = |from: [f64; 2]| {
        let mut best = (point(pixels[0]), -1.0);
        for &idx in pixels {
            let p = point(idx);
            let d = (p[0] - from[0]).powi(2) + (p[1] - from[1]).powi(2);
            if d > best.1 {
                best = (p, d);
            }
        }
        best.0
    };

    let c0 = farthest_from(centroid);
    let c2 = farthest_from(c0);
    let axis = [c2[0] - c0[0], c2[1] - c0[1]];

    let (mut c1, mut c1_cross) = (c0, 0.0);
    let (mut c3, mut c3_cross) = (c0, 0.0);
    for &idx in pixels {
        let p = point(idx);
        let cross = axis[0] * (p[1] - c0[1]) - axis[1] * (p[0] - c0[0]);
        if cross > c1_cross {
            c1 = p;
            c1_cross = cross;
        }
        if cross < c3_cross {
            c3 = p;
            c3_cross = cross;
        }
    }
    if c1_cross <= 0.0 || c3_cross >= 0.0 {
        return None;
    }

    // Pixel centres sit half a pixel inside the marker outline.
    let nudge = |d: f64| {
        if d > 0.25 {
            0.5
        } else if d < -0.25 {
            -0.5
        } else {
            0.0
        }
    };
    let push_out = |p: [f64; 2]| -> Point {
        let dx = nudge(p[0] - centroid[0]);
        let dy = nudge(p[1] - centroid[1]);
        [(p[0] + dx) as f32, (p[1] + dy) as f32]
    };
    let mut quad = [push_out(c0), push_out(c1), push_out(c2), push_out(c3)];
    if signed_area(&quad) < 0.0 {
        quad = [quad[0], quad[3], quad[2], quad[1]];
    }

    let start = (0..4)
        .min_by(|&a, &b| {
            let ka = quad[a][0] + quad[a][1];
            let kb = quad[b][0] + quad[b][1];
            ka.total_cmp(&kb)
        })
        .unwrap_or(0);
    quad.rotate_left(start);

    let min_edge = (0..4)
        .map(|i| edge_length(quad[i], quad[(i + 1) % 4]))
        .fold(f32::INFINITY, f32::min);
    if min_edge < min_side as f32 * 0.5 {
        return None;
    }
    Some(quad)
}

fn edge_length(a: Point, b: Point) -> f32 {
    ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt()
}

/// Try the four marker orientations; the first whose orientation cells match wins.
fn decode_quad(
    luma: &[u8],
    width: usize,
    height: usize,
    image_quad: &Quad,
    code: &SquareCode,
    config: &EngineConfig,
) -> Option<SquareCandidate> {
    let g = code.grid;
    let p = code.payload();
    let min_edge = (0..4)
        .map(|i| edge_length(image_quad[i], image_quad[(i + 1) % 4]))
        .fold(f32::INFINITY, f32::min);
    let radius = if min_edge / g as f32 >= 4.0 { 1 } else { 0 };

    for rotation in 0..4 {
        let mut corners = *image_quad;
        corners.rotate_left(rotation);
        let (cells, spreads) = sample_grid(luma, width, height, &corners, g, radius);

        let border: Vec<f32> = (0..g * g)
            .filter(|&i| {
                let (r, c) = (i / g, i % g);
                r == 0 || c == 0 || r == g - 1 || c == g - 1
            })
            .map(|i| cells[i])
            .collect();
        let black = border.iter().sum::<f32>() / border.len() as f32;
        let white = (0..p * p)
            .map(|i| cells[(i / p + 1) * g + i % p + 1])
            .fold(f32::MIN, f32::max);
        if white - black < config.min_contrast as f32 {
            return None;
        }
        let level = 0.5 * (white + black);
        if border.iter().any(|&v| v >= level) {
            return None;
        }
        // Every cell must be uniform; a straddled cell means the grid is wrong.
        if spreads.iter().any(|&(lo, hi)| lo < level && level <= hi) {
            return None;
        }

        let payload = |r: usize, c: usize| cells[(r + 1) * g + c + 1] >= level;
        let last = p - 1;
        if !payload(0, 0) || payload(0, last) || payload(last, 0) || payload(last, last) {
            continue;
        }

        let bits: Vec<bool> = code.data_cells().map(|(r, c)| payload(r, c)).collect();
        let Some(id) = code.decode(&bits) else {
            continue;
        };

        let half_range = 0.5 * (white - black);
        let confidence = cells
            .iter()
            .map(|&v| ((v - level).abs() / half_range).clamp(0.0, 1.0))
            .sum::<f32>()
            / cells.len() as f32;

        return Some(SquareCandidate {
            id,
            rotation,
            confidence,
            corners,
        });
    }
    None
}

/// Mean luma at each cell centre, row-major, marker-space, plus the
/// darkest and brightest of four samples taken towards the cell corners.
fn sample_grid(
    luma: &[u8],
    width: usize,
    height: usize,
    quad: &Quad,
    grid: usize,
    radius: isize,
) -> (Vec<f32>, Vec<(f32, f32)>) {
    let [tl, tr, br, bl] = *quad;
    let at = |u: f32, v: f32| -> Point {
        let top = lerp(tl, tr, u);
        let bottom = lerp(bl, br, u);
        lerp(top, bottom, v)
    };
    let pixel = |x: isize, y: isize| -> f32 {
        let x = x.clamp(0, width as isize - 1) as usize;
        let y = y.clamp(0, height as isize - 1) as usize;
        luma[y * width + x] as f32
    };

    let g = grid as f32;
    let mut cells = Vec::with_capacity(grid * grid);
    let mut spreads = Vec::with_capacity(grid * grid);
    for r in 0..grid {
        for c in 0..grid {
            let centre = at((c as f32 + 0.5) / g, (r as f32 + 0.5) / g);
            let cx = centre[0].round() as isize;
            let cy = centre[1].round() as isize;
            let mut sum = 0.0;
            let mut count = 0.0;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    sum += pixel(cx + dx, cy + dy);
                    count += 1.0;
                }
            }
            cells.push(sum / count);

            let mut spread = (f32::MAX, f32::MIN);
            for du in [0.2, 0.8] {
                for dv in [0.2, 0.8] {
                    let p = at((c as f32 + du) / g, (r as f32 + dv) / g);
                    let v = pixel(p[0].round() as isize, p[1].round() as isize);
                    spread = (spread.0.min(v), spread.1.max(v));
                }
            }
            spreads.push(spread);
        }
    }
    (cells, spreads)
}

fn lerp(a: Point, b: Point, t: f32) -> Point {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]
}
