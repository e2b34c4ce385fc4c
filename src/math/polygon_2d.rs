use super::{Point2, TOLERANCE};

/// Computes the signed area of a polygon (shoelace formula).
///
/// Positive for counter-clockwise, negative for clockwise.
#[must_use]
pub fn signed_area_2d(points: &[Point2]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        sum += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    sum * 0.5
}

/// Even-odd containment test. Points exactly on the boundary are unspecified.
#[must_use]
pub fn point_in_polygon(point: &Point2, polygon: &[Point2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (a, b) = (&polygon[i], &polygon[j]);
        if (a.y > point.y) != (b.y > point.y) {
            let x_cross = a.x + (point.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Returns `true` if every edge of the closed polygon is axis-aligned.
///
/// Zero-length edges (a repeated closing vertex) are allowed.
#[must_use]
pub fn is_rectilinear(polygon: &[Point2]) -> bool {
    let n = polygon.len();
    (0..n).all(|i| {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        (a.x - b.x).abs() < TOLERANCE || (a.y - b.y).abs() < TOLERANCE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64) -> Point2 {
        Point2::new(x, y)
    }

    fn l_shape() -> Vec<Point2> {
        vec![
            p(0.0, 0.0),
            p(4.0, 0.0),
            p(4.0, 2.0),
            p(2.0, 2.0),
            p(2.0, 4.0),
            p(0.0, 4.0),
        ]
    }

    #[test]
    fn signed_area_of_l_shape() {
        assert_relative_eq!(signed_area_2d(&l_shape()), 12.0);
        let reversed: Vec<_> = l_shape().into_iter().rev().collect();
        assert_relative_eq!(signed_area_2d(&reversed), -12.0);
    }

    #[test]
    fn containment_respects_concave_notch() {
        let poly = l_shape();
        assert!(point_in_polygon(&p(1.0, 1.0), &poly));
        assert!(point_in_polygon(&p(1.0, 3.0), &poly));
        assert!(!point_in_polygon(&p(3.0, 3.0), &poly));
        assert!(!point_in_polygon(&p(5.0, 1.0), &poly));
    }

    #[test]
    fn rectilinear_detection() {
        assert!(is_rectilinear(&l_shape()));
        let mut closed = l_shape();
        closed.push(p(0.0, 0.0));
        assert!(is_rectilinear(&closed));
        assert!(!is_rectilinear(&[p(0.0, 0.0), p(1.0, 0.0), p(0.0, 1.0)]));
    }
}
