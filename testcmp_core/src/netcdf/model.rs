//! In-memory view of a NetCDF dataset: groups, attributes, dimensions and
//! fully loaded variables.

use std::collections::BTreeMap;
use std::fmt;

/// Typed contents of a variable or an attribute
#[derive(Debug, Clone)]
pub enum Values {
    Byte(Vec<i8>),
    Char(Vec<u8>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
    UByte(Vec<u8>),
    UShort(Vec<u16>),
    UInt(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Str(Vec<String>),
}

macro_rules! for_each_numeric {
    ($values:expr, $v:ident => $body:expr, $text:ident => $text_body:expr) => {
        match $values {
            Values::Byte($v) => $body,
            Values::Char($v) => $body,
            Values::Short($v) => $body,
            Values::Int($v) => $body,
            Values::Float($v) => $body,
            Values::Double($v) => $body,
            Values::UByte($v) => $body,
            Values::UShort($v) => $body,
            Values::UInt($v) => $body,
            Values::Int64($v) => $body,
            Values::UInt64($v) => $body,
            Values::Str($text) => $text_body,
        }
    };
}

impl Values {
    pub fn len(&self) -> usize {
        for_each_numeric!(self, v => v.len(), s => s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Numpy-style name of the element type
    pub fn dtype(&self) -> &'static str {
        match self {
            Values::Byte(_) => "int8",
            Values::Char(_) => "S1",
            Values::Short(_) => "int16",
            Values::Int(_) => "int32",
            Values::Float(_) => "float32",
            Values::Double(_) => "float64",
            Values::UByte(_) => "uint8",
            Values::UShort(_) => "uint16",
            Values::UInt(_) => "uint32",
            Values::Int64(_) => "int64",
            Values::UInt64(_) => "uint64",
            Values::Str(_) => "str",
        }
    }

    /// Element `i` widened to `f64`, `None` for strings.
    pub fn as_f64(&self, i: usize) -> Option<f64> {
        for_each_numeric!(self, v => v.get(i).map(|x| *x as f64), _s => None)
    }

    /// The value the NetCDF library writes into cells that were never set.
    ///
    /// Byte and char variables are not masked by default.
    pub fn default_fill(&self) -> Option<f64> {
        match self {
            Values::Short(_) => Some(-32767.0),
            Values::Int(_) => Some(-2147483647.0),
            Values::Float(_) => Some(9.969_209_968_386_869e36f32 as f64),
            Values::Double(_) => Some(9.969_209_968_386_869e36),
            Values::UShort(_) => Some(65535.0),
            Values::UInt(_) => Some(4294967295.0),
            Values::Int64(_) => Some(-9223372036854775806_i64 as f64),
            Values::UInt64(_) => Some(18446744073709551614_u64 as f64),
            Values::Byte(_) | Values::Char(_) | Values::UByte(_) | Values::Str(_) => None,
        }
    }

    /// Whether element `i` of `self` equals element `j` of `other`.
    ///
    /// Elements of the same type are compared exactly, mixed types after
    /// widening to `f64`. NaN equals NaN, so a NaN `_FillValue` masks the
    /// cells it marks and a variable holding NaN equals itself.
    pub fn cell_eq(&self, i: usize, other: &Values, j: usize) -> bool {
        use Values::*;

        match (self, other) {
            (Float(a), Float(b)) => a[i] == b[j] || (a[i].is_nan() && b[j].is_nan()),
            (Double(a), Double(b)) => a[i] == b[j] || (a[i].is_nan() && b[j].is_nan()),
            (Byte(a), Byte(b)) => a[i] == b[j],
            (Char(a), Char(b)) | (UByte(a), UByte(b)) => a[i] == b[j],
            (Short(a), Short(b)) => a[i] == b[j],
            (Int(a), Int(b)) => a[i] == b[j],
            (UShort(a), UShort(b)) => a[i] == b[j],
            (UInt(a), UInt(b)) => a[i] == b[j],
            (Int64(a), Int64(b)) => a[i] == b[j],
            (UInt64(a), UInt64(b)) => a[i] == b[j],
            (Str(a), Str(b)) => a[i] == b[j],
            _ => match (self.as_f64(i), other.as_f64(j)) {
                (Some(x), Some(y)) => x == y || (x.is_nan() && y.is_nan()),
                _ => false,
            },
        }
    }

    /// Whether element `i` equals any element of `targets`.
    pub fn matches_any(&self, i: usize, targets: &Values) -> bool {
        (0..targets.len()).any(|j| self.cell_eq(i, targets, j))
    }
}

/// Same type, same length, and `cell_eq` everywhere (NaN equals NaN)
impl PartialEq for Values {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
            && self.len() == other.len()
            && (0..self.len()).all(|i| self.cell_eq(i, other, i))
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    if items.len() == 1 {
        return write!(f, "{}", items[0]);
    }

    write!(f, "[")?;
    for (k, item) in items.iter().enumerate() {
        if k > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", item)?;
    }
    write!(f, "]")
}

impl fmt::Display for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Char attributes are text
            Values::Char(v) => {
                let text = String::from_utf8_lossy(v);
                write!(f, "{}", text.trim_end_matches('\0'))
            }
            Values::Str(v) => write_list(f, v),
            other => for_each_numeric!(other, v => write_list(f, v), s => write_list(f, s)),
        }
    }
}

/// Number of elements of an array of the given shape, `None` on overflow.
pub fn element_count(shape: &[usize]) -> Option<usize> {
    if shape.contains(&0) {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |n, len| n.checked_mul(*len))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dimensions: Vec<String>,
    pub shape: Vec<usize>,
    pub attributes: BTreeMap<String, Values>,
    /// Storage properties reported alongside attributes (chunking, compression)
    pub filters: BTreeMap<String, String>,
    pub data: Values,
}

impl Variable {
    pub fn dtype(&self) -> &'static str {
        self.data.dtype()
    }

    pub fn size(&self) -> usize {
        element_count(&self.shape).unwrap_or(usize::MAX)
    }

    /// Attribute dictionary merged with storage metadata
    pub fn merged_attributes(&self) -> BTreeMap<String, Values> {
        let mut merged = self.attributes.clone();
        for (k, v) in &self.filters {
            merged.insert(k.clone(), Values::Str(vec![v.clone()]));
        }
        merged
    }

    /// Cells hidden from content comparison: equal to `_FillValue` (or the
    /// default fill value when none is set) or to `missing_value`.
    pub fn mask(&self) -> Vec<bool> {
        let fill = self.attributes.get("_FillValue");
        let default_fill = if fill.is_none() { self.data.default_fill() } else { None };
        let missing = self.attributes.get("missing_value");

        (0..self.data.len())
            .map(|i| {
                fill.is_some_and(|f| self.data.matches_any(i, f))
                    || default_fill.is_some_and(|f| self.data.as_f64(i) == Some(f))
                    || missing.is_some_and(|m| self.data.matches_any(i, m))
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    pub attributes: BTreeMap<String, Values>,
    pub dimensions: BTreeMap<String, usize>,
    pub variables: BTreeMap<String, Variable>,
    pub groups: BTreeMap<String, Group>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub data_model: String,
    pub disk_format: String,
    pub file_format: String,
    pub root: Group,
}
