//! Line-oriented mask record reader.
//!
//! The reader recognizes four record kinds and skips every other keyword of a
//! textual layout dump (`HEADER`, `BGNLIB`, `BOUNDARY`, `DATATYPE`, ...):
//!
//! ```text
//! UNITS <mask unit> <meter unit>
//! LAYER <layer id>
//! XY <x>:<y>
//! <x>:<y>
//! ENDEL
//! ```

use std::cmp::Ordering;
use std::fmt;

use crate::error::{FormatError, Result};

/// Identifier of a mask layer.
///
/// Identifiers that parse as unsigned integers are ordered numerically and
/// sort before textual identifiers, which are ordered lexically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayerId(String);

impl LayerId {
    /// Creates a layer identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for LayerId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<u64>(), other.0.parse::<u64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for LayerId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One typed record of the mask stream.
#[derive(Debug, Clone, PartialEq)]
pub enum MaskRecord {
    /// Scale factors. `mask_unit` must equal `meter_unit * 1e6`.
    Units { mask_unit: f64, meter_unit: f64 },
    /// Opens a layer grouping.
    LayerStart(LayerId),
    /// Raw coordinate in mask units.
    Point { x: f64, y: f64 },
    /// Closes the current polygon element.
    ElementEnd,
}

/// Reads mask records from layout text.
///
/// # Errors
///
/// Returns [`FormatError`] for malformed numbers, a `LAYER` line without an
/// identifier, or a point run that is not closed by `ENDEL`.
pub fn parse_records(text: &str) -> Result<Vec<MaskRecord>> {
    let mut records = Vec::new();
    // Line number of the `XY` record that opened the current point run.
    let mut run_start: Option<usize> = None;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if let Some(start) = run_start {
            if line.is_empty() {
                continue;
            }
            if line.starts_with("ENDEL") {
                records.push(MaskRecord::ElementEnd);
                run_start = None;
                continue;
            }
            match parse_coordinate(line, line_no) {
                Some(point) => {
                    let (x, y) = point?;
                    records.push(MaskRecord::Point { x, y });
                }
                None => return Err(FormatError::UnterminatedElement { line: start }.into()),
            }
            continue;
        }

        let mut fields = line.split_whitespace();
        match fields.next() {
            Some("UNITS") => {
                let mask_unit = parse_float(fields.next(), line, line_no)?;
                let meter_unit = parse_float(fields.next(), line, line_no)?;
                records.push(MaskRecord::Units {
                    mask_unit,
                    meter_unit,
                });
            }
            Some("LAYER") => {
                let id = fields
                    .next()
                    .ok_or(FormatError::MissingLayerId { line: line_no })?;
                records.push(MaskRecord::LayerStart(LayerId::new(id)));
            }
            Some("XY") => {
                let rest = line["XY".len()..].trim();
                let (x, y) = parse_coordinate(rest, line_no).ok_or_else(|| {
                    FormatError::InvalidNumber {
                        line: line_no,
                        text: line.to_string(),
                    }
                })??;
                records.push(MaskRecord::Point { x, y });
                run_start = Some(line_no);
            }
            _ => {}
        }
    }

    if let Some(start) = run_start {
        return Err(FormatError::UnterminatedElement { line: start }.into());
    }

    Ok(records)
}

/// Parses `<x>:<y>`. Returns `None` if the text is not a coordinate at all.
fn parse_coordinate(text: &str, line_no: usize) -> Option<Result<(f64, f64)>> {
    let (x, y) = text.split_once(':')?;
    let parse = |s: &str| -> Result<f64> {
        s.trim().parse::<f64>().map_err(|_| {
            FormatError::InvalidNumber {
                line: line_no,
                text: text.to_string(),
            }
            .into()
        })
    };
    Some(parse(x).and_then(|x| parse(y).map(|y| (x, y))))
}

fn parse_float(field: Option<&str>, line: &str, line_no: usize) -> Result<f64> {
    field
        .and_then(|f| f.parse::<f64>().ok())
        .ok_or_else(|| {
            FormatError::InvalidNumber {
                line: line_no,
                text: line.to_string(),
            }
            .into()
        })
}
