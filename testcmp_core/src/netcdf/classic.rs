//! Reader for the classic NetCDF formats (CDF-1, CDF-2 and CDF-5).
//!
//! Header layout and data placement follow the NetCDF classic format
//! description: big-endian, names and values padded to four bytes, record
//! variables interleaved record by record after the fixed-size variables.

use super::model::{element_count, Dataset, Group, Values, Variable};
use std::collections::BTreeMap;
use std::path::Path;
use testcmp_common::{Result, TestCmpError};

const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;
const STREAMING: u64 = 0xFFFF_FFFF;

/// Classic format version, from the fourth byte of the magic number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Classic,
    Offset64,
    Data64,
}

impl Version {
    pub fn data_model(self) -> &'static str {
        match self {
            Version::Classic => "NETCDF3_CLASSIC",
            Version::Offset64 => "NETCDF3_64BIT_OFFSET",
            Version::Data64 => "NETCDF3_64BIT_DATA",
        }
    }
}

/// Whether `bytes` starts with a classic NetCDF magic number.
pub fn is_classic(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && &bytes[..3] == b"CDF" && matches!(bytes[3], 1 | 2 | 5)
}

struct VarHeader {
    name: String,
    dim_ids: Vec<usize>,
    attributes: BTreeMap<String, Values>,
    nc_type: u32,
    vsize: u64,
    begin: u64,
}

struct Parser<'a> {
    path: &'a Path,
    buf: &'a [u8],
    pos: usize,
    version: Version,
}

impl<'a> Parser<'a> {
    fn error(&self, message: impl ToString) -> TestCmpError {
        TestCmpError::format(self.path, message)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| self.error(format!("truncated header at byte {}", self.pos)))?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    fn non_neg(&mut self) -> Result<u64> {
        match self.version {
            Version::Data64 => self.u64(),
            _ => self.u32().map(u64::from),
        }
    }

    fn offset(&mut self) -> Result<u64> {
        match self.version {
            Version::Classic => self.u32().map(u64::from),
            _ => self.u64(),
        }
    }

    /// Bytes left after the current position, an upper bound for any list length
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn count(&mut self) -> Result<usize> {
        let n = self.non_neg()?;
        usize::try_from(n).map_err(|_| self.error(format!("count {} out of range", n)))
    }

    fn skip_padding(&mut self, len: usize) -> Result<()> {
        self.take((4 - len % 4) % 4).map(|_| ())
    }

    fn name(&mut self) -> Result<String> {
        let len = self.count()?;
        let bytes = self.take(len)?;
        let name = String::from_utf8(bytes.to_vec()).map_err(|_| self.error("name is not UTF-8"))?;
        self.skip_padding(len)?;
        Ok(name)
    }

    /// List header: tag, element count. ABSENT yields zero elements.
    fn list(&mut self, expected: u32) -> Result<usize> {
        let tag = self.u32()?;
        let n = self.count()?;
        if tag == 0 && n == 0 {
            Ok(0)
        } else if tag == expected {
            Ok(n)
        } else {
            Err(self.error(format!("unexpected tag {:#x}", tag)))
        }
    }

    fn attributes(&mut self) -> Result<BTreeMap<String, Values>> {
        let n = self.list(NC_ATTRIBUTE)?;
        let mut attributes = BTreeMap::new();

        for _ in 0..n {
            let name = self.name()?;
            let nc_type = self.u32()?;
            let nelems = self.count()?;
            let size = type_size(nc_type).ok_or_else(|| self.error(format!("bad type {}", nc_type)))?;
            let len = nelems
                .checked_mul(size)
                .ok_or_else(|| self.error("attribute too large"))?;
            let bytes = self.take(len)?;
            let values = decode(nc_type, bytes).ok_or_else(|| self.error(format!("bad type {}", nc_type)))?;
            self.skip_padding(len)?;
            attributes.insert(name, values);
        }

        Ok(attributes)
    }
}

fn type_size(nc_type: u32) -> Option<usize> {
    match nc_type {
        1 | 2 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 5 | 9 => Some(4),
        6 | 10 | 11 => Some(8),
        _ => None,
    }
}

fn decode(nc_type: u32, bytes: &[u8]) -> Option<Values> {
    macro_rules! be {
        ($t:ty, $n:expr) => {
            bytes
                .chunks_exact($n)
                .map(|c| {
                    let mut raw = [0u8; $n];
                    raw.copy_from_slice(c);
                    <$t>::from_be_bytes(raw)
                })
                .collect()
        };
    }

    Some(match nc_type {
        1 => Values::Byte(bytes.iter().map(|b| *b as i8).collect()),
        2 => Values::Char(bytes.to_vec()),
        3 => Values::Short(be!(i16, 2)),
        4 => Values::Int(be!(i32, 4)),
        5 => Values::Float(be!(f32, 4)),
        6 => Values::Double(be!(f64, 8)),
        7 => Values::UByte(bytes.to_vec()),
        8 => Values::UShort(be!(u16, 2)),
        9 => Values::UInt(be!(u32, 4)),
        10 => Values::Int64(be!(i64, 8)),
        11 => Values::UInt64(be!(u64, 8)),
        _ => return None,
    })
}

/// Parse a classic NetCDF file already loaded into memory.
pub fn parse(path: &Path, buf: &[u8]) -> Result<Dataset> {
    if !is_classic(buf) {
        return Err(TestCmpError::format(path, "not a classic NetCDF file"));
    }

    let version = match buf[3] {
        1 => Version::Classic,
        2 => Version::Offset64,
        _ => Version::Data64,
    };
    let mut p = Parser {
        path,
        buf,
        pos: 4,
        version,
    };

    let numrecs = p.non_neg()?;
    if numrecs == STREAMING && version != Version::Data64 {
        return Err(p.error("streaming record count is not supported"));
    }
    let numrecs = usize::try_from(numrecs).map_err(|_| p.error("record count out of range"))?;

    let n_dims = p.list(NC_DIMENSION)?;
    let mut dims = Vec::with_capacity(n_dims.min(p.remaining()));
    let mut record_dim = None;
    for id in 0..n_dims {
        let name = p.name()?;
        let len = p.count()?;
        if len == 0 {
            record_dim = Some(id);
        }
        dims.push((name, len));
    }

    let global = p.attributes()?;

    let n_vars = p.list(NC_VARIABLE)?;
    let mut headers = Vec::with_capacity(n_vars.min(p.remaining()));
    for _ in 0..n_vars {
        let name = p.name()?;
        let rank = p.count()?;
        let mut dim_ids = Vec::with_capacity(rank.min(p.remaining()));
        for _ in 0..rank {
            let id = p.count()?;
            if id >= dims.len() {
                return Err(p.error(format!("variable {} uses unknown dimension {}", name, id)));
            }
            dim_ids.push(id);
        }
        let attributes = p.attributes()?;
        let nc_type = p.u32()?;
        let vsize = p.non_neg()?;
        let begin = p.offset()?;
        headers.push(VarHeader {
            name,
            dim_ids,
            attributes,
            nc_type,
            vsize,
            begin,
        });
    }

    let is_record = |h: &VarHeader| record_dim.is_some() && h.dim_ids.first() == record_dim.as_ref();
    let record_vars: Vec<&VarHeader> = headers.iter().filter(|h| is_record(h)).collect();

    let mut variables = BTreeMap::new();
    for header in &headers {
        let size = type_size(header.nc_type).ok_or_else(|| p.error(format!("bad type {}", header.nc_type)))?;
        let record = is_record(header);
        let shape: Vec<usize> = header
            .dim_ids
            .iter()
            .map(|id| if Some(*id) == record_dim { numrecs } else { dims[*id].1 })
            .collect();

        let too_large = || p.error(format!("variable {} too large", header.name));

        // Bytes of one record (or of the whole variable if not a record variable)
        let slab = element_count(&shape[usize::from(record)..])
            .and_then(|n| n.checked_mul(size))
            .ok_or_else(too_large)?;

        let bytes = if record {
            // A single record variable is stored without padding
            let recsize = if record_vars.len() == 1 {
                slab as u64
            } else {
                record_vars
                    .iter()
                    .try_fold(0u64, |acc, h| acc.checked_add(h.vsize))
                    .ok_or_else(too_large)?
            };
            let total = slab
                .checked_mul(numrecs)
                .filter(|total| *total <= buf.len())
                .ok_or_else(too_large)?;
            let mut bytes = Vec::with_capacity(total);
            // Empty records hold nothing to read, however many there are
            let n_read = if slab == 0 { 0 } else { numrecs as u64 };
            for r in 0..n_read {
                let start = r
                    .checked_mul(recsize)
                    .and_then(|offset| offset.checked_add(header.begin))
                    .ok_or_else(too_large)?;
                bytes.extend_from_slice(slice(&p, start, slab)?);
            }
            bytes
        } else {
            slice(&p, header.begin, slab)?.to_vec()
        };

        let data = decode(header.nc_type, &bytes).ok_or_else(|| p.error(format!("bad type {}", header.nc_type)))?;
        variables.insert(
            header.name.clone(),
            Variable {
                dimensions: header.dim_ids.iter().map(|id| dims[*id].0.clone()).collect(),
                shape,
                attributes: header.attributes.clone(),
                filters: BTreeMap::new(),
                data,
            },
        );
    }

    let dimensions = dims
        .into_iter()
        .enumerate()
        .map(|(id, (name, len))| (name, if Some(id) == record_dim { numrecs } else { len }))
        .collect();

    Ok(Dataset {
        data_model: version.data_model().to_string(),
        disk_format: "NETCDF3".to_string(),
        file_format: version.data_model().to_string(),
        root: Group {
            attributes: global,
            dimensions,
            variables,
            groups: BTreeMap::new(),
        },
    })
}

fn slice<'a>(p: &Parser<'a>, start: u64, len: usize) -> Result<&'a [u8]> {
    usize::try_from(start)
        .ok()
        .and_then(|start| Some((start, start.checked_add(len)?)))
        .filter(|(_, end)| *end <= p.buf.len())
        .map(|(start, end)| &p.buf[start..end])
        .ok_or_else(|| p.error(format!("data at offset {} beyond end of file", start)))
}


#[cfg(test)]
mod tests {
    use super::writer::{write_classic, Var};
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn reads_header_and_data() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ocean.nc");
        write_classic(
            &path,
            &[("lat", 2), ("lon", 3)],
            &[("title", Values::Char(b"test run".to_vec()))],
            &[Var {
                name: "temp",
                dims: &[0, 1],
                attributes: &[("units", Values::Char(b"K".to_vec()))],
                data: Values::Float(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            }],
        );

        let buf = fs::read(&path).unwrap();
        let dataset = parse(&path, &buf).unwrap();
        assert_eq!(dataset.data_model, "NETCDF3_CLASSIC");
        assert_eq!(dataset.root.dimensions["lon"], 3);
        assert_eq!(dataset.root.attributes["title"].to_string(), "test run");

        let temp = &dataset.root.variables["temp"];
        assert_eq!(temp.shape, vec![2, 3]);
        assert_eq!(temp.dimensions, vec!["lat", "lon"]);
        assert_eq!(temp.dtype(), "float32");
        assert_eq!(temp.data, Values::Float(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
    }

    #[test]
    fn reads_interleaved_record_variables() {
        // Hand-assembled: time (unlimited), two record variables of one short each
        let mut buf = Vec::new();
        buf.extend_from_slice(b"CDF\x01");
        buf.extend_from_slice(&2u32.to_be_bytes());
        buf.extend_from_slice(&NC_DIMENSION.to_be_bytes());
        buf.extend_from_slice(&1u32.to_be_bytes());
        buf.extend_from_slice(&4u32.to_be_bytes());
        buf.extend_from_slice(b"time");
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);
        buf.extend_from_slice(&NC_VARIABLE.to_be_bytes());
        buf.extend_from_slice(&2u32.to_be_bytes());

        let header_end = buf.len() + 2 * (4 + 4 + 4 + 4 + 8 + 4 + 4 + 4);
        for (k, name) in ["a", "b"].iter().enumerate() {
            buf.extend_from_slice(&1u32.to_be_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(&[0u8; 3]);
            buf.extend_from_slice(&1u32.to_be_bytes());
            buf.extend_from_slice(&0u32.to_be_bytes());
            buf.extend_from_slice(&[0u8; 8]);
            buf.extend_from_slice(&3u32.to_be_bytes());
            buf.extend_from_slice(&4u32.to_be_bytes());
            buf.extend_from_slice(&((header_end + 4 * k) as u32).to_be_bytes());
        }
        assert_eq!(buf.len(), header_end);
        for record in [[10i16, 20], [11, 21]] {
            for value in record {
                buf.extend_from_slice(&value.to_be_bytes());
                buf.extend_from_slice(&[0u8; 2]);
            }
        }

        let dataset = parse(Path::new("rec.nc"), &buf).unwrap();
        assert_eq!(dataset.root.dimensions["time"], 2);
        assert_eq!(dataset.root.variables["a"].data, Values::Short(vec![10, 11]));
        assert_eq!(dataset.root.variables["b"].data, Values::Short(vec![20, 21]));
        assert_eq!(dataset.root.variables["b"].shape, vec![2]);
    }

    #[test]
    fn oversized_dimensions_are_a_format_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("huge.nc");
        write_classic(
            &path,
            &[("x", 0x7FFF_FFFF), ("y", 0x7FFF_FFFF), ("z", 0x7FFF_FFFF)],
            &[],
            &[Var {
                name: "cube",
                dims: &[0, 1, 2],
                attributes: &[],
                data: Values::Double(vec![]),
            }],
        );
        let buf = fs::read(&path).unwrap();
        assert!(parse(&path, &buf).unwrap_err().is_format());

        // No overflow, but far more data than the file holds
        write_classic(
            &path,
            &[("x", 0x7FFF_FFFF)],
            &[],
            &[Var {
                name: "line",
                dims: &[0],
                attributes: &[],
                data: Values::Double(vec![1.0]),
            }],
        );
        let buf = fs::read(&path).unwrap();
        assert!(parse(&path, &buf).unwrap_err().is_format());
    }

    #[test]
    fn huge_counts_in_header_are_a_format_error() {
        // Dimension list claiming four billion entries, then nothing
        let mut buf = b"CDF\x01".to_vec();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&NC_DIMENSION.to_be_bytes());
        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(parse(Path::new("liar.nc"), &buf).unwrap_err().is_format());
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let err = parse(Path::new("short.nc"), b"CDF\x01\x00\x00").unwrap_err();
        assert!(err.is_format());

        let err = parse(Path::new("text.nc"), b"netcdf text {}").unwrap_err();
        assert!(err.is_format());
    }
}
