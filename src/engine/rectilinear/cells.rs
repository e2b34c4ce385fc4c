//! Axis-aligned cell arithmetic for Manhattan layouts.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::ops::Range;

use crate::error::EngineError;
use crate::math::polygon_2d::{is_rectilinear, point_in_polygon, signed_area_2d};
use crate::math::{quantize, Point2, TOLERANCE};

/// An axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Rect {
    /// Creates a rectangle from two opposite corners in any order.
    #[must_use]
    pub fn from_corners(a: Point2, b: Point2) -> Self {
        Self {
            x_min: a.x.min(b.x),
            x_max: a.x.max(b.x),
            y_min: a.y.min(b.y),
            y_max: a.y.max(b.y),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    #[must_use]
    pub fn center(&self) -> Point2 {
        Point2::new(
            0.5 * (self.x_min + self.x_max),
            0.5 * (self.y_min + self.y_max),
        )
    }

    #[must_use]
    pub fn contains(&self, p: &Point2) -> bool {
        p.x >= self.x_min - TOLERANCE
            && p.x <= self.x_max + TOLERANCE
            && p.y >= self.y_min - TOLERANCE
            && p.y <= self.y_max + TOLERANCE
    }

    /// Corners in counter-clockwise order starting at `(x_min, y_min)`.
    #[must_use]
    pub fn corners(&self) -> [Point2; 4] {
        [
            Point2::new(self.x_min, self.y_min),
            Point2::new(self.x_max, self.y_min),
            Point2::new(self.x_max, self.y_max),
            Point2::new(self.x_min, self.y_max),
        ]
    }
}

/// Sorted breakpoints with near-duplicates merged.
fn breakpoints(mut values: Vec<f64>) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values.dedup_by(|later, kept| (*later - *kept).abs() < TOLERANCE);
    values
}

/// Tensor grid spanned by the breakpoints of a set of rectangles.
struct Grid {
    xs: Vec<f64>,
    ys: Vec<f64>,
}

impl Grid {
    fn covering<'a>(rects: impl Iterator<Item = &'a Rect>) -> Self {
        let mut xs = Vec::new();
        let mut ys = Vec::new();
        for r in rects {
            xs.extend([r.x_min, r.x_max]);
            ys.extend([r.y_min, r.y_max]);
        }
        Self {
            xs: breakpoints(xs),
            ys: breakpoints(ys),
        }
    }

    /// Cell indices along one axis lying inside `[lo, hi]`.
    fn span(axis: &[f64], lo: f64, hi: f64) -> Range<usize> {
        let start = axis.iter().position(|&v| v >= lo - TOLERANCE).unwrap_or(axis.len());
        let end = axis.iter().rposition(|&v| v <= hi + TOLERANCE).unwrap_or(0);
        start..end.max(start)
    }

    fn cells_of(&self, rect: &Rect) -> impl Iterator<Item = (usize, usize)> + '_ {
        let xs = Self::span(&self.xs, rect.x_min, rect.x_max);
        let ys = Self::span(&self.ys, rect.y_min, rect.y_max);
        ys.flat_map(move |iy| xs.clone().map(move |ix| (iy, ix)))
    }

    fn cell(&self, (iy, ix): (usize, usize)) -> Rect {
        Rect {
            x_min: self.xs[ix],
            x_max: self.xs[ix + 1],
            y_min: self.ys[iy],
            y_max: self.ys[iy + 1],
        }
    }
}

/// A 4-connected group of grid cells covered by the same operands.
#[derive(Debug, Clone)]
pub struct Piece {
    pub cells: Vec<Rect>,
    /// Indices of the covering operands, ascending.
    pub sources: Vec<usize>,
}

/// Conformal partition of overlapping cell sets.
#[derive(Debug, Clone)]
pub struct Partition {
    /// Pieces in row-major order of their first cell.
    pub pieces: Vec<Piece>,
    /// Number of grid cells covered by each operand.
    pub operand_cells: Vec<usize>,
}

/// Splits overlapping operands into non-overlapping pieces on a common grid.
#[must_use]
pub fn partition(operands: &[&[Rect]]) -> Partition {
    let grid = Grid::covering(operands.iter().flat_map(|rects| rects.iter()));

    // (iy, ix) -> covering operands; BTreeMap keeps row-major order.
    let mut coverage: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    for (i, rects) in operands.iter().enumerate() {
        for rect in *rects {
            for key in grid.cells_of(rect) {
                let sources = coverage.entry(key).or_default();
                if sources.last() != Some(&i) {
                    sources.push(i);
                }
            }
        }
    }

    let mut operand_cells = vec![0; operands.len()];
    for sources in coverage.values() {
        for &i in sources {
            operand_cells[i] += 1;
        }
    }

    let mut visited: BTreeSet<(usize, usize)> = BTreeSet::new();
    let mut pieces = Vec::new();
    for (&seed, sources) in &coverage {
        if !visited.insert(seed) {
            continue;
        }
        let mut cells = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some((iy, ix)) = queue.pop_front() {
            let neighbours = [
                iy.checked_sub(1).map(|y| (y, ix)),
                Some((iy + 1, ix)),
                ix.checked_sub(1).map(|x| (iy, x)),
                Some((iy, ix + 1)),
            ];
            for key in neighbours.into_iter().flatten() {
                if coverage.get(&key) == Some(sources) && visited.insert(key) {
                    cells.push(key);
                    queue.push_back(key);
                }
            }
        }
        cells.sort_unstable();
        pieces.push(Piece {
            cells: cells.into_iter().map(|key| grid.cell(key)).collect(),
            sources: sources.clone(),
        });
    }

    Partition {
        pieces,
        operand_cells,
    }
}

/// Hashable identity of a segment, independent of direction.
pub type SegmentKey = (i64, i64, i64, i64);

#[must_use]
pub fn segment_key(a: Point2, b: Point2) -> SegmentKey {
    let ka = (quantize(a.x), quantize(a.y));
    let kb = (quantize(b.x), quantize(b.y));
    let (lo, hi) = if ka <= kb { (ka, kb) } else { (kb, ka) };
    (lo.0, lo.1, hi.0, hi.1)
}

/// Cell edges not shared by two cells of the same set, in key order.
#[must_use]
pub fn boundary_edges(cells: &[Rect]) -> Vec<(Point2, Point2)> {
    let mut edges: BTreeMap<SegmentKey, (usize, Point2, Point2)> = BTreeMap::new();
    for cell in cells {
        let c = cell.corners();
        for i in 0..4 {
            let (a, b) = (c[i], c[(i + 1) % 4]);
            edges
                .entry(segment_key(a, b))
                .and_modify(|e| e.0 += 1)
                .or_insert((1, a, b));
        }
    }
    edges
        .into_values()
        .filter(|(count, _, _)| *count == 1)
        .map(|(_, a, b)| (a, b))
        .collect()
}

/// Decomposes a closed rectilinear polygon into grid cells.
///
/// # Errors
///
/// Returns [`EngineError::Unsupported`] for a polygon with a non-axis-aligned
/// edge and [`EngineError::Degenerate`] for a polygon enclosing no area.
pub fn polygon_cells(polygon: &[Point2]) -> Result<Vec<Rect>, EngineError> {
    if !is_rectilinear(polygon) {
        return Err(EngineError::Unsupported(
            "polygon with non axis-aligned edges".into(),
        ));
    }
    if signed_area_2d(polygon).abs() < TOLERANCE {
        return Err(EngineError::Degenerate("polygon encloses no area".into()));
    }

    let xs = breakpoints(polygon.iter().map(|p| p.x).collect());
    let ys = breakpoints(polygon.iter().map(|p| p.y).collect());
    let grid = Grid { xs, ys };

    let mut cells = Vec::new();
    for iy in 0..grid.ys.len().saturating_sub(1) {
        for ix in 0..grid.xs.len().saturating_sub(1) {
            let cell = grid.cell((iy, ix));
            if point_in_polygon(&cell.center(), polygon) {
                cells.push(cell);
            }
        }
    }
    Ok(cells)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(x_min: f64, x_max: f64, y_min: f64, y_max: f64) -> Rect {
        Rect {
            x_min,
            x_max,
            y_min,
            y_max,
        }
    }

    fn total_area(cells: &[Rect]) -> f64 {
        cells.iter().map(Rect::area).sum()
    }

    #[test]
    fn disjoint_operands_stay_whole() {
        let a = [rect(0.0, 1.0, 0.0, 1.0)];
        let b = [rect(2.0, 3.0, 0.0, 1.0)];
        let result = partition(&[&a, &b]);
        assert_eq!(result.pieces.len(), 2);
        assert_eq!(result.pieces[0].sources, vec![0]);
        assert_eq!(result.pieces[1].sources, vec![1]);
        assert_eq!(result.operand_cells, vec![1, 1]);
    }

    #[test]
    fn nested_rectangle_splits_host_into_ring() {
        let host = [rect(0.0, 4.0, 0.0, 4.0)];
        let dot = [rect(1.0, 2.0, 1.0, 2.0)];
        let result = partition(&[&host, &dot]);

        assert_eq!(result.pieces.len(), 2);
        let ring = result.pieces.iter().find(|p| p.sources == [0]).unwrap();
        let inner = result.pieces.iter().find(|p| p.sources == [0, 1]).unwrap();
        assert_relative_eq!(total_area(&ring.cells), 15.0);
        assert_relative_eq!(total_area(&inner.cells), 1.0);
        assert_eq!(result.operand_cells, vec![9, 1]);
    }

    #[test]
    fn same_signature_regions_split_by_connectivity() {
        // Bar across the host splits the host's remainder in two.
        let host = [rect(0.0, 3.0, 0.0, 1.0)];
        let bar = [rect(1.0, 2.0, -1.0, 2.0)];
        let result = partition(&[&host, &bar]);
        let host_only = result.pieces.iter().filter(|p| p.sources == [0]).count();
        assert_eq!(host_only, 2);
    }

    #[test]
    fn boundary_of_two_cells_skips_shared_edge() {
        let cells = [rect(0.0, 1.0, 0.0, 1.0), rect(1.0, 2.0, 0.0, 1.0)];
        let edges = boundary_edges(&cells);
        assert_eq!(edges.len(), 6);
        assert!(edges
            .iter()
            .all(|(a, b)| !(a.x == 1.0 && b.x == 1.0)));
    }

    #[test]
    fn l_polygon_becomes_three_cells() {
        let poly = [
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(4.0, 2.0),
            Point2::new(2.0, 2.0),
            Point2::new(2.0, 4.0),
            Point2::new(0.0, 4.0),
            Point2::new(0.0, 0.0),
        ];
        let cells = polygon_cells(&poly).unwrap();
        assert_eq!(cells.len(), 3);
        assert_relative_eq!(total_area(&cells), 12.0);
    }

    #[test]
    fn slanted_polygon_is_unsupported() {
        let poly = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        assert!(matches!(
            polygon_cells(&poly),
            Err(EngineError::Unsupported(_))
        ));
    }
}
