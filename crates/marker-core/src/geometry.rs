use crate::detector::{Point, Quad};

/// Intersection of the quad's diagonals (corner 0 to 2, corner 1 to 3).
/// Falls back to the corner average when the diagonals are parallel.
pub fn diagonal_intersection(quad: &Quad) -> Point {
    let [p0, p1, p2, p3] = quad.map(|p| [p[0] as f64, p[1] as f64]);
    let d1 = [p2[0] - p0[0], p2[1] - p0[1]];
    let d2 = [p3[0] - p1[0], p3[1] - p1[1]];
    let denom = d1[0] * d2[1] - d1[1] * d2[0];
    if denom.abs() < 1e-9 {
        return corner_mean(quad);
    }
    let t = ((p1[0] - p0[0]) * d2[1] - (p1[1] - p0[1]) * d2[0]) / denom;
    [(p0[0] + t * d1[0]) as f32, (p0[1] + t * d1[1]) as f32]
}

pub fn corner_mean(quad: &Quad) -> Point {
    let (sx, sy) = quad
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / 4.0, sy / 4.0]
}

/// Midpoint of two points.
pub fn midpoint(a: Point, b: Point) -> Point {
    [0.5 * (a[0] + b[0]), 0.5 * (a[1] + b[1])]
}

/// Signed shoelace area; positive for top-left, top-right, bottom-right,
/// bottom-left order in image coordinates (y down).
pub fn signed_area(quad: &Quad) -> f32 {
    let mut sum = 0.0;
    for i in 0..4 {
        let a = quad[i];
        let b = quad[(i + 1) % 4];
        sum += a[0] * b[1] - b[0] * a[1];
    }
    0.5 * sum
}

/// Side lengths of the minimum-area rectangle enclosing `points`.
///
/// Returns `(0, 0)` for degenerate input (fewer than three hull vertices).
pub fn min_area_rect(points: &[Point]) -> (f64, f64) {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return (0.0, 0.0);
    }

    let mut best = (f64::INFINITY, 0.0, 0.0);
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let len = ((b[0] - a[0]).powi(2) + (b[1] - a[1]).powi(2)).sqrt();
        if len < 1e-12 {
            continue;
        }
        let u = [(b[0] - a[0]) / len, (b[1] - a[1]) / len];
        let n = [-u[1], u[0]];

        let (mut min_u, mut max_u, mut min_n, mut max_n) =
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
        for p in &hull {
            let pu = p[0] * u[0] + p[1] * u[1];
            let pn = p[0] * n[0] + p[1] * n[1];
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_n = min_n.min(pn);
            max_n = max_n.max(pn);
        }
        let (w, h) = (max_u - min_u, max_n - min_n);
        if w * h < best.0 {
            best = (w * h, w, h);
        }
    }

    if best.0.is_finite() {
        (best.1, best.2)
    } else {
        (0.0, 0.0)
    }
}

/// Andrew's monotone chain; collinear points are dropped.
fn convex_hull(points: &[Point]) -> Vec<[f64; 2]> {
    let mut pts: Vec<[f64; 2]> = points
        .iter()
        .map(|p| [p[0] as f64, p[1] as f64])
        .collect();
    pts.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let cross = |o: [f64; 2], a: [f64; 2], b: [f64; 2]| {
        (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
    };

    let mut hull: Vec<[f64; 2]> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn diagonals_of_square_meet_in_middle() {
        let quad = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        assert_eq!(diagonal_intersection(&quad), [5.0, 5.0]);
    }

    #[test]
    fn clockwise_image_order_is_positive() {
        let quad = [[0.0, 0.0], [4.0, 0.0], [4.0, 2.0], [0.0, 2.0]];
        assert!(signed_area(&quad) > 0.0);
        let reversed = [quad[0], quad[3], quad[2], quad[1]];
        assert!(signed_area(&reversed) < 0.0);
    }

    #[test]
    fn min_rect_of_rotated_square() {
        let quad = [[5.0, 0.0], [10.0, 5.0], [5.0, 10.0], [0.0, 5.0]];
        let (w, h) = min_area_rect(&quad);
        let side = 50f64.sqrt();
        assert!((w - side).abs() < 1e-6);
        assert!((h - side).abs() < 1e-6);
    }

    #[test]
    fn collinear_points_have_no_rect() {
        let quad = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        assert_eq!(min_area_rect(&quad), (0.0, 0.0));
    }

    proptest! {
        #[test]
        fn min_rect_of_translated_rectangle(
            x in -50.0f32..50.0,
            y in -50.0f32..50.0,
            w in 1.0f32..80.0,
            h in 1.0f32..80.0,
        ) {
            let quad = [[x, y], [x + w, y], [x + w, y + h], [x, y + h]];
            let (a, b) = min_area_rect(&quad);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let (want_lo, want_hi) = (w.min(h) as f64, w.max(h) as f64);
            prop_assert!((lo - want_lo).abs() < 1e-3);
            prop_assert!((hi - want_hi).abs() < 1e-3);

            let center = diagonal_intersection(&quad);
            prop_assert!((center[0] - (x + w / 2.0)).abs() < 1e-3);
            prop_assert!((center[1] - (y + h / 2.0)).abs() < 1e-3);
        }
    }
}
