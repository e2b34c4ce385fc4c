//! Parametric construction script consumed by a geometry engine.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{FormatError, Result};

use super::record::LayerId;

macro_rules! script_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

script_handle! {
    /// Identifier of a `Point` statement.
    PointRef
}
script_handle! {
    /// Identifier of a `Line` statement.
    LineRef
}
script_handle! {
    /// Identifier of a `Curve Loop` statement.
    CurveLoopRef
}
script_handle! {
    /// Identifier of a `Plane Surface` statement.
    SurfaceRef
}

/// A single construction statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Point {
        id: PointRef,
        x: f64,
        y: f64,
        z: f64,
        mesh_size: f64,
    },
    Line {
        id: LineRef,
        start: PointRef,
        end: PointRef,
    },
    CurveLoop {
        id: CurveLoopRef,
        lines: Vec<LineRef>,
    },
    PlaneSurface {
        id: SurfaceRef,
        curve_loop: CurveLoopRef,
    },
    /// Splits the listed surfaces into a non-overlapping partition.
    /// With `delete`, the operands are replaced by the result.
    BooleanFragments {
        surfaces: Vec<SurfaceRef>,
        delete: bool,
    },
}

/// One compiled polygon of a mask layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerElement {
    pub curve_loop: CurveLoopRef,
    pub surface: SurfaceRef,
}

/// An ordered list of construction statements.
///
/// Each handle kind has its own counter starting at 1.
#[derive(Debug, Clone)]
pub struct Script {
    statements: Vec<Statement>,
    layers: BTreeMap<LayerId, Vec<LayerElement>>,
    next_point: u32,
    next_line: u32,
    next_curve_loop: u32,
    next_surface: u32,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            statements: Vec::new(),
            layers: BTreeMap::new(),
            next_point: 1,
            next_line: 1,
            next_curve_loop: 1,
            next_surface: 1,
        }
    }
}

impl Script {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statements in emission order.
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Compiled elements grouped by mask layer, in ascending layer order.
    #[must_use]
    pub fn layers(&self) -> &BTreeMap<LayerId, Vec<LayerElement>> {
        &self.layers
    }

    pub fn add_point(&mut self, x: f64, y: f64, z: f64, mesh_size: f64) -> PointRef {
        let id = PointRef(self.next_point);
        self.push(Statement::Point {
            id,
            x,
            y,
            z,
            mesh_size,
        });
        id
    }

    pub fn add_line(&mut self, start: PointRef, end: PointRef) -> LineRef {
        let id = LineRef(self.next_line);
        self.push(Statement::Line { id, start, end });
        id
    }

    pub fn add_curve_loop(&mut self, lines: Vec<LineRef>) -> CurveLoopRef {
        let id = CurveLoopRef(self.next_curve_loop);
        self.push(Statement::CurveLoop { id, lines });
        id
    }

    pub fn add_plane_surface(&mut self, curve_loop: CurveLoopRef) -> SurfaceRef {
        let id = SurfaceRef(self.next_surface);
        self.push(Statement::PlaneSurface { id, curve_loop });
        id
    }

    pub fn add_boolean_fragments(&mut self, surfaces: Vec<SurfaceRef>, delete: bool) {
        self.push(Statement::BooleanFragments { surfaces, delete });
    }

    /// Opens a layer grouping, keeping any elements already recorded for it.
    pub fn open_layer(&mut self, layer: LayerId) {
        self.layers.entry(layer).or_default();
    }

    /// Records a compiled element under its layer.
    pub fn record_element(&mut self, layer: LayerId, element: LayerElement) {
        self.layers.entry(layer).or_default().push(element);
    }

    /// Appends a statement with an explicit identifier, advancing the counter
    /// of its kind past that identifier.
    pub fn push(&mut self, statement: Statement) {
        match &statement {
            Statement::Point { id, .. } => self.next_point = self.next_point.max(id.0 + 1),
            Statement::Line { id, .. } => self.next_line = self.next_line.max(id.0 + 1),
            Statement::CurveLoop { id, .. } => {
                self.next_curve_loop = self.next_curve_loop.max(id.0 + 1);
            }
            Statement::PlaneSurface { id, .. } => {
                self.next_surface = self.next_surface.max(id.0 + 1);
            }
            Statement::BooleanFragments { .. } => {}
        }
        self.statements.push(statement);
    }

    /// Parses script text in the format produced by [`fmt::Display`].
    ///
    /// Layer grouping is not part of the text, so [`Script::layers`] of the
    /// result is empty.
    ///
    /// # Errors
    ///
    /// Returns [`FormatError`] for statements that are not recognized or carry
    /// malformed numbers.
    pub fn parse(text: &str) -> Result<Self> {
        let mut script = Self::new();
        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with("//") || line.starts_with("SetFactory") {
                continue;
            }
            script.push(parse_statement(line, line_no)?);
        }
        Ok(script)
    }
}

fn parse_statement(line: &str, line_no: usize) -> Result<Statement> {
    let invalid = || FormatError::InvalidStatement {
        line: line_no,
        text: line.to_string(),
    };

    if let Some(rest) = line.strip_prefix("BooleanFragments") {
        let start = rest.find("Surface{").ok_or_else(invalid)? + "Surface{".len();
        let len = rest[start..].find('}').ok_or_else(invalid)?;
        let surfaces = parse_list(&rest[start..start + len], line, line_no)?
            .into_iter()
            .map(SurfaceRef)
            .collect();
        return Ok(Statement::BooleanFragments {
            surfaces,
            delete: rest.contains("Delete;"),
        });
    }

    let open = line.find('(').ok_or_else(invalid)?;
    let close = line.find(')').ok_or_else(invalid)?;
    let keyword = line[..open].trim();
    let id = parse_list(&line[open + 1..close], line, line_no)?
        .first()
        .copied()
        .ok_or_else(invalid)?;
    let body_start = line[close..].find('{').ok_or_else(invalid)? + close + 1;
    let body_end = line.rfind('}').ok_or_else(invalid)?;
    if body_end < body_start {
        return Err(invalid().into());
    }
    let body = &line[body_start..body_end];

    match keyword {
        "Point" => {
            let values = parse_floats(body, line, line_no)?;
            let [x, y, z, mesh_size] = values[..] else {
                return Err(invalid().into());
            };
            Ok(Statement::Point {
                id: PointRef(id),
                x,
                y,
                z,
                mesh_size,
            })
        }
        "Line" => {
            let ids = parse_list(body, line, line_no)?;
            let [start, end] = ids[..] else {
                return Err(invalid().into());
            };
            Ok(Statement::Line {
                id: LineRef(id),
                start: PointRef(start),
                end: PointRef(end),
            })
        }
        "Curve Loop" => Ok(Statement::CurveLoop {
            id: CurveLoopRef(id),
            lines: parse_list(body, line, line_no)?
                .into_iter()
                .map(LineRef)
                .collect(),
        }),
        "Plane Surface" => {
            let ids = parse_list(body, line, line_no)?;
            let [curve_loop] = ids[..] else {
                return Err(invalid().into());
            };
            Ok(Statement::PlaneSurface {
                id: SurfaceRef(id),
                curve_loop: CurveLoopRef(curve_loop),
            })
        }
        _ => Err(invalid().into()),
    }
}

fn parse_list(text: &str, line: &str, line_no: usize) -> Result<Vec<u32>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|_| {
                FormatError::InvalidNumber {
                    line: line_no,
                    text: line.to_string(),
                }
                .into()
            })
        })
        .collect()
}

fn parse_floats(text: &str, line: &str, line_no: usize) -> Result<Vec<f64>> {
    text.split(',')
        .map(str::trim)
        .map(|s| {
            s.parse::<f64>().map_err(|_| {
                FormatError::InvalidNumber {
                    line: line_no,
                    text: line.to_string(),
                }
                .into()
            })
        })
        .collect()
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Point {
                id,
                x,
                y,
                z,
                mesh_size,
            } => write!(f, "Point({id}) = {{{x:?}, {y:?}, {z:?}, {mesh_size:?}}};"),
            Self::Line { id, start, end } => write!(f, "Line({id}) = {{{start}, {end}}};"),
            Self::CurveLoop { id, lines } => write!(f, "Curve Loop({id}) = {{{}}};", join(lines)),
            Self::PlaneSurface { id, curve_loop } => {
                write!(f, "Plane Surface({id}) = {{{curve_loop}}};")
            }
            Self::BooleanFragments { surfaces, delete } => {
                let delete = if *delete { " Delete;" } else { "" };
                write!(f, "BooleanFragments{{ Surface{{{}}};{delete} }}{{}}", join(surfaces))
            }
        }
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SetFactory(\"OpenCASCADE\");")?;
        writeln!(f)?;
        for statement in &self.statements {
            writeln!(f, "{statement}")?;
            if matches!(statement, Statement::PlaneSurface { .. }) {
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_independent_per_kind() {
        let mut script = Script::new();
        let a = script.add_point(0.0, 0.0, 0.0, 1.0);
        let b = script.add_point(1.0, 0.0, 0.0, 1.0);
        let line = script.add_line(a, b);
        let curve_loop = script.add_curve_loop(vec![line]);
        let surface = script.add_plane_surface(curve_loop);
        assert_eq!((a, b), (PointRef(1), PointRef(2)));
        assert_eq!(line, LineRef(1));
        assert_eq!(curve_loop, CurveLoopRef(1));
        assert_eq!(surface, SurfaceRef(1));
    }

    #[test]
    fn renders_engine_statements() {
        let mut script = Script::new();
        let a = script.add_point(0.169, 1_000_000.0, 0.0, 0.015);
        let b = script.add_point(2.0, 0.0, 0.0, 0.015);
        let line = script.add_line(a, b);
        script.add_boolean_fragments(vec![SurfaceRef(1), SurfaceRef(2)], true);
        let text = script.to_string();
        assert!(text.starts_with("SetFactory(\"OpenCASCADE\");"));
        assert!(text.contains("Point(1) = {0.169, 1000000.0, 0.0, 0.015};"));
        assert!(text.contains(&format!("Line({line}) = {{1, 2}};")));
        assert!(text.contains("BooleanFragments{ Surface{1, 2}; Delete; }{}"));
    }

    #[test]
    fn parses_rendered_text() {
        let text = "\
SetFactory(\"OpenCASCADE\");

Point(1) = {0.0, 0.0, 0.0, 10.0};
Point(2) = {5.0, 0.0, 0.0, 10.0};
Point(3) = {5.0, 5.0, 0.0, 10.0};
Line(1) = {1, 2};
Line(2) = {2, 3};
Line(3) = {3, 1};
Curve Loop(1) = {1, 2, 3};
Plane Surface(1) = {1};
BooleanFragments{ Surface{1}; Delete; }{}
";
        let script = Script::parse(text).unwrap();
        assert_eq!(script.statements().len(), 9);
        assert_eq!(
            script.statements()[6],
            Statement::CurveLoop {
                id: CurveLoopRef(1),
                lines: vec![LineRef(1), LineRef(2), LineRef(3)],
            }
        );
        assert_eq!(
            script.statements()[8],
            Statement::BooleanFragments {
                surfaces: vec![SurfaceRef(1)],
                delete: true,
            }
        );
        // Counters continue after parsed identifiers.
        let mut script = script;
        assert_eq!(script.add_point(0.0, 0.0, 0.0, 1.0), PointRef(4));
    }

    #[test]
    fn rejects_unknown_statement() {
        assert!(Script::parse("Sphere(1) = {0, 0, 0, 1};").is_err());
        assert!(Script::parse("Point(1) = {0.0, 0.0};").is_err());
    }
}
