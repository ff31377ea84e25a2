//! Fancy indexers and their normalization.
//!
//! An [`IndexExpr`] is an ordered list of [`Indexer`]s, one per dimension,
//! with an optional ellipsis standing for the omitted dimensions. Indexers
//! accept the domain values of the dimension kind: integers everywhere,
//! floats on a scaled dimension (or epoch seconds on a time dimension),
//! labels on a labeled dimension, datetimes or ISO-8601 strings on a time
//! dimension.
//!
//! [`IndexExpr::normalize`] maps the expression against the resolved
//! dimensions of an array into a [`SubsetSpec`]: canonical `[lo, hi)` integer
//! bounds per dimension plus the collapse flags of scalar indexers. Scalar
//! indexers must land exactly on a cell; a scale or time value that
//! misaligns by more than half an ulp of the step is an index error.
//! Any explicit step other than 1 is rejected.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::schema::{Dimension, Label};
use crate::value::{format_datetime, parse_datetime_utc};

use super::bounds::Bounds;

/// An indexing error.
#[derive(Clone, Debug, Error)]
pub enum IndexError {
    /// An integer index outside the dimension.
    #[error("index {index} is out of range for dimension {dimension:?} of size {size}")]
    OutOfRange {
        /// The offending index.
        index: i64,
        /// The dimension name.
        dimension: String,
        /// The dimension size.
        size: u64,
    },
    /// A slice step other than 1.
    #[error("step {0} is invalid, subsets support only a step of 1")]
    InvalidStep(i64),
    /// An indexer the dimension kind does not accept.
    #[error("dimension {dimension:?} does not accept {kind} indexers")]
    KindMismatch {
        /// The dimension name.
        dimension: String,
        /// The indexer kind.
        kind: &'static str,
    },
    /// A scale value off the cell grid.
    #[error("value {value} does not align with the scale of dimension {dimension:?}")]
    Misaligned {
        /// The offending value.
        value: f64,
        /// The dimension name.
        dimension: String,
    },
    /// A datetime off the time grid.
    #[error("datetime {value} does not align with the time grid of dimension {dimension:?}")]
    MisalignedTime {
        /// The offending datetime, ISO-8601.
        value: String,
        /// The dimension name.
        dimension: String,
    },
    /// A label absent from the dimension.
    #[error("label {0} is not present in dimension {1:?}")]
    UnknownLabel(Label, String),
    /// A string that is neither a label nor a parsable datetime where one is
    /// required.
    #[error("{0:?} is not an ISO-8601 datetime with an explicit offset")]
    InvalidDatetime(String),
    /// More indexers than dimensions.
    #[error("{got} indexers supplied for {expected} dimensions")]
    TooManyIndexers {
        /// Number of indexers supplied.
        got: usize,
        /// Number of dimensions.
        expected: usize,
    },
    /// More than one ellipsis.
    #[error("an index expression may hold at most one ellipsis")]
    DuplicateEllipsis,
}

/// One fancy indexer.
#[derive(Clone, Debug, PartialEq)]
pub enum Indexer {
    /// An integer index; negative values count from the end.
    Int(i64),
    /// An integer range `[start, end)` with an optional explicit step.
    IntRange {
        /// Inclusive start; defaults to 0.
        start: Option<i64>,
        /// Exclusive end; defaults to the dimension size.
        end: Option<i64>,
        /// Step; only 1 is accepted.
        step: Option<i64>,
    },
    /// A scale value, or epoch seconds on a time dimension.
    Value(f64),
    /// A range of scale values (or epoch seconds), end exclusive.
    ValueRange {
        /// Inclusive start value.
        start: Option<f64>,
        /// Exclusive end value.
        end: Option<f64>,
    },
    /// A label, or an ISO-8601 string on a time dimension.
    Label(Label),
    /// A range of labels (or ISO-8601 strings), end exclusive.
    LabelRange {
        /// Inclusive start label.
        start: Option<Label>,
        /// Exclusive end label.
        end: Option<Label>,
    },
    /// A datetime on a time dimension.
    Datetime(DateTime<Utc>),
    /// A range of datetimes, end exclusive.
    DatetimeRange {
        /// Inclusive start.
        start: Option<DateTime<Utc>>,
        /// Exclusive end.
        end: Option<DateTime<Utc>>,
    },
    /// The full dimension.
    All,
    /// Stands for the full ranges of all omitted dimensions.
    Ellipsis,
}

impl From<i64> for Indexer {
    fn from(index: i64) -> Self {
        Self::Int(index)
    }
}

impl From<std::ops::Range<i64>> for Indexer {
    fn from(range: std::ops::Range<i64>) -> Self {
        Self::IntRange {
            start: Some(range.start),
            end: Some(range.end),
            step: None,
        }
    }
}

impl From<f64> for Indexer {
    fn from(value: f64) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Indexer {
    fn from(label: &str) -> Self {
        Self::Label(Label::Str(label.to_string()))
    }
}

impl From<DateTime<Utc>> for Indexer {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Datetime(dt)
    }
}

fn quote(text: &str) -> String {
    format!("`{text}`")
}

fn fmt_end<T>(end: &Option<T>, fmt: impl Fn(&T) -> String) -> String {
    end.as_ref().map(&fmt).unwrap_or_default()
}

impl core::fmt::Display for Indexer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Int(index) => write!(f, "{index}"),
            Self::IntRange { start, end, step } => {
                write!(
                    f,
                    "{}:{}",
                    fmt_end(start, ToString::to_string),
                    fmt_end(end, ToString::to_string)
                )?;
                if let Some(step) = step {
                    write!(f, ":{step}")?;
                }
                Ok(())
            }
            Self::Value(value) => write!(f, "{value}"),
            Self::ValueRange { start, end } => write!(
                f,
                "{}:{}",
                fmt_end(start, ToString::to_string),
                fmt_end(end, ToString::to_string)
            ),
            Self::Label(Label::Float(value)) => write!(f, "{value}"),
            Self::Label(Label::Str(label)) => write!(f, "{}", quote(label)),
            Self::LabelRange { start, end } => {
                let fmt = |label: &Label| match label {
                    Label::Float(value) => value.to_string(),
                    Label::Str(label) => quote(label),
                };
                write!(f, "{}:{}", fmt_end(start, fmt), fmt_end(end, fmt))
            }
            Self::Datetime(dt) => write!(f, "{}", quote(&format_datetime(dt))),
            Self::DatetimeRange { start, end } => {
                let fmt = |dt: &DateTime<Utc>| quote(&format_datetime(dt));
                write!(f, "{}:{}", fmt_end(start, fmt), fmt_end(end, fmt))
            }
            Self::All => write!(f, ":"),
            Self::Ellipsis => write!(f, "..."),
        }
    }
}

/// An ordered list of indexers, at most one of them an ellipsis.
///
/// The [`Display`](core::fmt::Display) form is the canonical slice string
/// used for logging and cross-process references, e.g.
/// ``[`2023-01-01T00:00:00+00:00`:`2023-02-01T00:00:00+00:00`, 0.1:0.9]``.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct IndexExpr(Vec<Indexer>);

impl IndexExpr {
    /// An expression selecting every array cell.
    #[must_use]
    pub fn all() -> Self {
        Self(vec![Indexer::Ellipsis])
    }

    /// Create an expression from indexers.
    #[must_use]
    pub fn new(indexers: Vec<Indexer>) -> Self {
        Self(indexers)
    }

    /// The indexers.
    #[must_use]
    pub fn indexers(&self) -> &[Indexer] {
        &self.0
    }

    /// Expand the ellipsis (or missing trailing indexers) into [`Indexer::All`]
    /// entries, one indexer per dimension.
    fn expand(&self, dimensionality: usize) -> Result<Vec<Indexer>, IndexError> {
        let ellipses = self
            .0
            .iter()
            .filter(|i| matches!(i, Indexer::Ellipsis))
            .count();
        if ellipses > 1 {
            return Err(IndexError::DuplicateEllipsis);
        }
        let explicit = self.0.len() - ellipses;
        if explicit > dimensionality {
            return Err(IndexError::TooManyIndexers {
                got: explicit,
                expected: dimensionality,
            });
        }
        let mut expanded = Vec::with_capacity(dimensionality);
        for indexer in &self.0 {
            if matches!(indexer, Indexer::Ellipsis) {
                for _ in 0..dimensionality - explicit {
                    expanded.push(Indexer::All);
                }
            } else {
                expanded.push(indexer.clone());
            }
        }
        while expanded.len() < dimensionality {
            expanded.push(Indexer::All);
        }
        Ok(expanded)
    }

    /// Normalize the expression against resolved dimensions.
    ///
    /// # Errors
    /// Returns an [`IndexError`] if any indexer is out of range, misaligned,
    /// unknown, of the wrong kind for its dimension, or carries a step ≠ 1.
    pub fn normalize(&self, dimensions: &[Dimension]) -> Result<SubsetSpec, IndexError> {
        let expanded = self.expand(dimensions.len())?;
        let mut ranges = Vec::with_capacity(dimensions.len());
        let mut collapsed = Vec::with_capacity(dimensions.len());
        for (indexer, dimension) in std::iter::zip(&expanded, dimensions) {
            let (range, collapse) = normalize_indexer(indexer, dimension)?;
            ranges.push(range);
            collapsed.push(collapse);
        }
        Ok(SubsetSpec {
            bounds: Bounds::from_ranges(&ranges),
            collapsed,
        })
    }
}

impl From<Indexer> for IndexExpr {
    fn from(indexer: Indexer) -> Self {
        Self(vec![indexer])
    }
}

impl From<Vec<Indexer>> for IndexExpr {
    fn from(indexers: Vec<Indexer>) -> Self {
        Self(indexers)
    }
}

impl From<i64> for IndexExpr {
    fn from(index: i64) -> Self {
        Self(vec![Indexer::from(index)])
    }
}

impl From<std::ops::Range<i64>> for IndexExpr {
    fn from(range: std::ops::Range<i64>) -> Self {
        Self(vec![Indexer::from(range)])
    }
}

impl From<f64> for IndexExpr {
    fn from(value: f64) -> Self {
        Self(vec![Indexer::from(value)])
    }
}

impl From<&str> for IndexExpr {
    fn from(label: &str) -> Self {
        Self(vec![Indexer::from(label)])
    }
}

impl From<DateTime<Utc>> for IndexExpr {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(vec![Indexer::from(dt)])
    }
}

impl core::fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[")?;
        for (n, indexer) in self.0.iter().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{indexer}")?;
        }
        write!(f, "]")
    }
}

/// Wrap a negative scalar index and check the bounds.
fn scalar_index(index: i64, dimension: &Dimension) -> Result<u64, IndexError> {
    let size = dimension.size();
    let wrapped = if index < 0 {
        index + size as i64
    } else {
        index
    };
    if wrapped < 0 || wrapped as u64 >= size {
        return Err(IndexError::OutOfRange {
            index,
            dimension: dimension.name().to_string(),
            size,
        });
    }
    Ok(wrapped as u64)
}

/// Clamp a (possibly negative, possibly past-the-end) range bound.
fn clamp_bound(bound: i64, size: u64) -> u64 {
    let wrapped = if bound < 0 { bound + size as i64 } else { bound };
    wrapped.clamp(0, size as i64) as u64
}

/// The exact cell of a scale value, within half an ulp of the step.
fn scale_cell(
    value: f64,
    start_value: f64,
    step: f64,
    dimension_name: &str,
) -> Result<i64, IndexError> {
    let index = ((value - start_value) / step).round();
    let nearest = start_value + index * step;
    let tolerance = 0.5 * f64::EPSILON * step.abs();
    if (value - nearest).abs() > tolerance || !index.is_finite() {
        return Err(IndexError::Misaligned {
            value,
            dimension: dimension_name.to_string(),
        });
    }
    Ok(index as i64)
}

/// The exact cell of a datetime on a time grid.
fn time_cell(
    value: DateTime<Utc>,
    start: DateTime<Utc>,
    step: chrono::Duration,
    dimension_name: &str,
) -> Result<i64, IndexError> {
    let misaligned = || IndexError::MisalignedTime {
        value: format_datetime(&value),
        dimension: dimension_name.to_string(),
    };
    let delta = (value - start).num_microseconds().ok_or_else(misaligned)?;
    let step = step.num_microseconds().ok_or_else(misaligned)?;
    if step <= 0 || delta % step != 0 {
        return Err(misaligned());
    }
    Ok(delta / step)
}

/// Epoch seconds to a UTC datetime.
fn seconds_to_datetime(seconds: f64, dimension_name: &str) -> Result<DateTime<Utc>, IndexError> {
    let misaligned = || IndexError::Misaligned {
        value: seconds,
        dimension: dimension_name.to_string(),
    };
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1e9).round() as u32;
    DateTime::from_timestamp(whole as i64, nanos)
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(misaligned)
}

fn kind_mismatch(dimension: &Dimension, kind: &'static str) -> IndexError {
    IndexError::KindMismatch {
        dimension: dimension.name().to_string(),
        kind,
    }
}

/// Find a label's position in a labeled dimension.
fn label_cell(label: &Label, labels: &[Label], dimension_name: &str) -> Result<u64, IndexError> {
    let matches = |candidate: &Label| match (candidate, label) {
        (Label::Str(a), Label::Str(b)) => a == b,
        (Label::Float(a), Label::Float(b)) => a == b,
        _ => false,
    };
    labels
        .iter()
        .position(|candidate| matches(candidate))
        .map(|index| index as u64)
        .ok_or_else(|| IndexError::UnknownLabel(label.clone(), dimension_name.to_string()))
}

/// A datetime scalar or bound: datetimes and ISO strings are interchangeable.
fn as_datetime(label: &Label) -> Result<DateTime<Utc>, IndexError> {
    match label {
        Label::Str(raw) => {
            parse_datetime_utc(raw).map_err(|_| IndexError::InvalidDatetime(raw.clone()))
        }
        Label::Float(_) => Err(IndexError::InvalidDatetime(label.to_string())),
    }
}

/// Normalize one indexer against one dimension into `([lo, hi), collapsed)`.
#[allow(clippy::too_many_lines)]
fn normalize_indexer(
    indexer: &Indexer,
    dimension: &Dimension,
) -> Result<(std::ops::Range<u64>, bool), IndexError> {
    let size = dimension.size();
    // A scalar time-grid cell: exact, in range, collapsed.
    let time_scalar = |value: DateTime<Utc>,
                       start: DateTime<Utc>,
                       step: chrono::Duration|
     -> Result<(std::ops::Range<u64>, bool), IndexError> {
        let cell = time_cell(value, start, step, dimension.name())?;
        if cell < 0 || cell as u64 >= size {
            return Err(IndexError::OutOfRange {
                index: cell,
                dimension: dimension.name().to_string(),
                size,
            });
        }
        Ok((cell as u64..cell as u64 + 1, true))
    };
    // A time-grid range: both ends exact, clamped into the dimension.
    let time_range = |start_value: Option<DateTime<Utc>>,
                      end_value: Option<DateTime<Utc>>,
                      start: DateTime<Utc>,
                      step: chrono::Duration|
     -> Result<(std::ops::Range<u64>, bool), IndexError> {
        let lo = match start_value {
            Some(value) => clamp_cell(time_cell(value, start, step, dimension.name())?, size),
            None => 0,
        };
        let hi = match end_value {
            Some(value) => clamp_cell(time_cell(value, start, step, dimension.name())?, size),
            None => size,
        };
        Ok((lo..hi.max(lo), false))
    };

    match (indexer, dimension) {
        (Indexer::Ellipsis, _) => unreachable!("ellipses are expanded before normalization"),
        (Indexer::All, _) => Ok((0..size, false)),
        (Indexer::Int(index), _) => {
            let index = scalar_index(*index, dimension)?;
            Ok((index..index + 1, true))
        }
        (Indexer::IntRange { step: Some(s), .. }, _) if *s != 1 => {
            Err(IndexError::InvalidStep(*s))
        }
        (Indexer::IntRange { start, end, .. }, _) => {
            let lo = start.map_or(0, |bound| clamp_bound(bound, size));
            let hi = end.map_or(size, |bound| clamp_bound(bound, size));
            Ok((lo..hi.max(lo), false))
        }
        (
            Indexer::Value(value),
            Dimension::Scaled {
                start_value, step, ..
            },
        ) => {
            let cell = scale_cell(*value, *start_value, *step, dimension.name())?;
            if cell < 0 || cell as u64 >= size {
                return Err(IndexError::OutOfRange {
                    index: cell,
                    dimension: dimension.name().to_string(),
                    size,
                });
            }
            Ok((cell as u64..cell as u64 + 1, true))
        }
        (
            Indexer::ValueRange { start, end },
            Dimension::Scaled {
                start_value, step, ..
            },
        ) => {
            let lo = match start {
                Some(value) => {
                    clamp_cell(scale_cell(*value, *start_value, *step, dimension.name())?, size)
                }
                None => 0,
            };
            let hi = match end {
                Some(value) => {
                    clamp_cell(scale_cell(*value, *start_value, *step, dimension.name())?, size)
                }
                None => size,
            };
            Ok((lo..hi.max(lo), false))
        }
        (Indexer::Value(seconds), Dimension::Time { start, step, .. }) => {
            time_scalar(seconds_to_datetime(*seconds, dimension.name())?, *start, *step)
        }
        (Indexer::ValueRange { start: lo, end: hi }, Dimension::Time { start, step, .. }) => {
            let lo = lo
                .map(|seconds| seconds_to_datetime(seconds, dimension.name()))
                .transpose()?;
            let hi = hi
                .map(|seconds| seconds_to_datetime(seconds, dimension.name()))
                .transpose()?;
            time_range(lo, hi, *start, *step)
        }
        (Indexer::Value(value), Dimension::Labeled { labels, .. }) => {
            let cell = label_cell(&Label::Float(*value), labels, dimension.name())?;
            Ok((cell..cell + 1, true))
        }
        (Indexer::ValueRange { start, end }, Dimension::Labeled { labels, .. }) => {
            let lo = match start {
                Some(value) => label_cell(&Label::Float(*value), labels, dimension.name())?,
                None => 0,
            };
            let hi = match end {
                Some(value) => label_cell(&Label::Float(*value), labels, dimension.name())?,
                None => size,
            };
            Ok((lo..hi.max(lo), false))
        }
        (Indexer::Label(label), Dimension::Labeled { labels, .. }) => {
            let cell = label_cell(label, labels, dimension.name())?;
            Ok((cell..cell + 1, true))
        }
        (Indexer::LabelRange { start, end }, Dimension::Labeled { labels, .. }) => {
            let lo = match start {
                Some(label) => label_cell(label, labels, dimension.name())?,
                None => 0,
            };
            let hi = match end {
                Some(label) => label_cell(label, labels, dimension.name())?,
                None => size,
            };
            Ok((lo..hi.max(lo), false))
        }
        (Indexer::Label(label), Dimension::Time { start, step, .. }) => {
            time_scalar(as_datetime(label)?, *start, *step)
        }
        (Indexer::LabelRange { start: lo, end: hi }, Dimension::Time { start, step, .. }) => {
            let lo = lo.as_ref().map(as_datetime).transpose()?;
            let hi = hi.as_ref().map(as_datetime).transpose()?;
            time_range(lo, hi, *start, *step)
        }
        (Indexer::Datetime(value), Dimension::Time { start, step, .. }) => {
            time_scalar(*value, *start, *step)
        }
        (Indexer::DatetimeRange { start: lo, end: hi }, Dimension::Time { start, step, .. }) => {
            time_range(*lo, *hi, *start, *step)
        }
        (Indexer::Value(_) | Indexer::ValueRange { .. }, _) => {
            Err(kind_mismatch(dimension, "float"))
        }
        (Indexer::Label(_) | Indexer::LabelRange { .. }, _) => {
            Err(kind_mismatch(dimension, "label"))
        }
        (Indexer::Datetime(_) | Indexer::DatetimeRange { .. }, _) => {
            Err(kind_mismatch(dimension, "datetime"))
        }
    }
}

fn clamp_cell(cell: i64, size: u64) -> u64 {
    cell.clamp(0, size as i64) as u64
}

/// The selected values of one dimension, as reported by
/// [`SubsetSpec::describe`].
#[derive(Clone, Debug, PartialEq)]
pub enum DimensionDescription {
    /// Selected integer indices of a plain dimension.
    Indices(Vec<u64>),
    /// Selected scale values of a scaled dimension.
    ScaleValues(Vec<f64>),
    /// Selected labels of a labeled dimension.
    Labels(Vec<Label>),
    /// Selected timestamps of a time dimension.
    Datetimes(Vec<DateTime<Utc>>),
}

/// The selection one subset makes on one dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct DimensionSelection {
    /// The dimension name.
    pub name: String,
    /// The values selected.
    pub description: DimensionDescription,
}

/// The normalized form of an index expression: canonical bounds plus
/// collapse flags.
#[derive(Clone, Debug, PartialEq)]
pub struct SubsetSpec {
    bounds: Bounds,
    collapsed: Vec<bool>,
}

impl SubsetSpec {
    /// The canonical per-dimension bounds.
    #[must_use]
    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// The collapse flag per dimension.
    #[must_use]
    pub fn collapsed(&self) -> &[bool] {
        &self.collapsed
    }

    /// The subset shape: the sizes of the non-collapsed dimensions, in order.
    #[must_use]
    pub fn shape(&self) -> Vec<u64> {
        std::iter::zip(self.bounds.shape(), &self.collapsed)
            .filter(|(_, collapsed)| !**collapsed)
            .map(|(size, _)| *size)
            .collect()
    }

    /// The number of selected elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.bounds.num_elements()
    }

    /// Describe the selected values per dimension.
    ///
    /// A pure function of the schema and the bounds: plain dimensions list
    /// their indices, scaled dimensions their scale values, labeled
    /// dimensions their labels, time dimensions their timestamps.
    #[must_use]
    pub fn describe(&self, dimensions: &[Dimension]) -> Vec<DimensionSelection> {
        std::iter::zip(dimensions, 0..self.bounds.dimensionality())
            .map(|(dimension, axis)| {
                let range = self.bounds.range(axis);
                let description = match dimension {
                    Dimension::Plain { .. } => DimensionDescription::Indices(range.collect()),
                    Dimension::Scaled { .. } => DimensionDescription::ScaleValues(
                        range
                            .map(|index| dimension.scale_value(index).unwrap_or_default())
                            .collect(),
                    ),
                    Dimension::Labeled { labels, .. } => DimensionDescription::Labels(
                        range.map(|index| labels[index as usize].clone()).collect(),
                    ),
                    Dimension::Time { start, step, .. } => DimensionDescription::Datetimes(
                        range
                            .map(|index| *start + *step * (index as i32))
                            .collect(),
                    ),
                };
                DimensionSelection {
                    name: dimension.name().to_string(),
                    description,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn scaled() -> Dimension {
        Dimension::Scaled {
            name: "y".to_string(),
            size: 3,
            start_value: 90.0,
            step: -1.0,
        }
    }

    fn labeled() -> Dimension {
        Dimension::Labeled {
            name: "w".to_string(),
            size: 2,
            labels: vec!["t".into(), "h".into()],
        }
    }

    fn time() -> Dimension {
        Dimension::Time {
            name: "dt".to_string(),
            size: 24,
            start: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            step: Duration::hours(1),
        }
    }

    fn plain(size: u64) -> Dimension {
        Dimension::Plain {
            name: "i".to_string(),
            size,
        }
    }

    #[test]
    fn integer_indexing() {
        let dims = [plain(10)];
        let spec = IndexExpr::from(3_i64).normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 3..4);
        assert_eq!(spec.shape(), Vec::<u64>::new());

        // -size selects element 0, -size - 1 fails.
        let spec = IndexExpr::from(-10_i64).normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 0..1);
        assert!(IndexExpr::from(-11_i64).normalize(&dims).is_err());
        assert!(IndexExpr::from(10_i64).normalize(&dims).is_err());
    }

    #[test]
    fn integer_ranges_clamp() {
        let dims = [plain(10)];
        let spec = IndexExpr::from(2_i64..20).normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 2..10);
        assert_eq!(spec.shape(), vec![8]);

        let spec = IndexExpr::from(-3_i64..-1).normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 7..9);
    }

    #[test]
    fn step_other_than_one_is_rejected() {
        let dims = [plain(10)];
        let expr = IndexExpr::new(vec![Indexer::IntRange {
            start: None,
            end: None,
            step: Some(2),
        }]);
        assert!(matches!(
            expr.normalize(&dims),
            Err(IndexError::InvalidStep(2))
        ));
        let expr = IndexExpr::new(vec![Indexer::IntRange {
            start: None,
            end: None,
            step: Some(1),
        }]);
        assert!(expr.normalize(&dims).is_ok());
    }

    #[test]
    fn ellipsis_expansion() {
        let dims = [plain(4), plain(5), plain(6)];
        let expr = IndexExpr::new(vec![Indexer::Int(1), Indexer::Ellipsis]);
        let spec = expr.normalize(&dims).unwrap();
        assert_eq!(spec.shape(), vec![5, 6]);

        let expr = IndexExpr::new(vec![Indexer::Ellipsis, Indexer::Int(2)]);
        let spec = expr.normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(2), 2..3);
        assert_eq!(spec.shape(), vec![4, 5]);

        // Missing trailing dimensions are full ranges.
        let expr = IndexExpr::new(vec![Indexer::Int(0)]);
        assert_eq!(expr.normalize(&dims).unwrap().shape(), vec![5, 6]);

        let expr = IndexExpr::new(vec![Indexer::Ellipsis, Indexer::Ellipsis]);
        assert!(matches!(
            expr.normalize(&dims),
            Err(IndexError::DuplicateEllipsis)
        ));
        let expr = IndexExpr::new(vec![Indexer::Int(0); 4]);
        assert!(matches!(
            expr.normalize(&dims),
            Err(IndexError::TooManyIndexers { .. })
        ));
    }

    #[test]
    fn scale_lookup() {
        let dims = [scaled()];
        let spec = IndexExpr::from(89.0).normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 1..2);

        // Misaligned by far more than half an ulp of the step.
        assert!(matches!(
            IndexExpr::from(89.5).normalize(&dims),
            Err(IndexError::Misaligned { .. })
        ));
        // Aligned but out of range.
        assert!(matches!(
            IndexExpr::from(91.0).normalize(&dims),
            Err(IndexError::OutOfRange { .. })
        ));

        let expr = IndexExpr::new(vec![Indexer::ValueRange {
            start: Some(90.0),
            end: Some(88.0),
        }]);
        let spec = expr.normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 0..2);
    }

    #[test]
    fn label_lookup() {
        let dims = [labeled()];
        let spec = IndexExpr::from("h").normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 1..2);
        assert!(matches!(
            IndexExpr::from("q").normalize(&dims),
            Err(IndexError::UnknownLabel(..))
        ));
        let expr = IndexExpr::new(vec![Indexer::LabelRange {
            start: None,
            end: Some("h".into()),
        }]);
        assert_eq!(expr.normalize(&dims).unwrap().bounds().range(0), 0..1);
    }

    #[test]
    fn datetime_lookup() {
        let dims = [time()];
        let dt = Utc.with_ymd_and_hms(2023, 1, 1, 2, 0, 0).unwrap();
        let spec = IndexExpr::from(dt).normalize(&dims).unwrap();
        assert_eq!(spec.bounds().range(0), 2..3);

        // A non-UTC ISO string is normalized to UTC before lookup.
        let expr = IndexExpr::from("2023-01-01T05:00:00+03:00");
        assert_eq!(expr.normalize(&dims).unwrap().bounds().range(0), 2..3);

        // Half past the hour misses the grid.
        let off = Utc.with_ymd_and_hms(2023, 1, 1, 2, 30, 0).unwrap();
        assert!(matches!(
            IndexExpr::from(off).normalize(&dims),
            Err(IndexError::MisalignedTime { .. })
        ));

        // Epoch seconds of 2023-01-01T01:00:00Z.
        let expr = IndexExpr::from(1_672_534_800.0);
        assert_eq!(expr.normalize(&dims).unwrap().bounds().range(0), 1..2);
    }

    #[test]
    fn describe_is_deterministic() {
        let dims = [time(), scaled(), labeled()];
        let expr = IndexExpr::new(vec![
            Indexer::Int(0),
            Indexer::All,
            Indexer::Label("h".into()),
        ]);
        let spec = expr.normalize(&dims).unwrap();
        let selections = spec.describe(&dims);
        assert_eq!(selections[0].name, "dt");
        assert_eq!(
            selections[1].description,
            DimensionDescription::ScaleValues(vec![90.0, 89.0, 88.0])
        );
        assert_eq!(
            selections[2].description,
            DimensionDescription::Labels(vec!["h".into()])
        );
        assert_eq!(spec.describe(&dims), selections);
    }

    #[test]
    fn slice_string() {
        let expr = IndexExpr::new(vec![
            Indexer::LabelRange {
                start: Some("2023-01-01T00:00:00+00:00".into()),
                end: Some("2023-02-01T00:00:00+00:00".into()),
            },
            Indexer::ValueRange {
                start: Some(0.1),
                end: Some(0.9),
            },
            Indexer::Int(-1),
            Indexer::All,
        ]);
        assert_eq!(
            expr.to_string(),
            "[`2023-01-01T00:00:00+00:00`:`2023-02-01T00:00:00+00:00`, 0.1:0.9, -1, :]"
        );
    }
}
