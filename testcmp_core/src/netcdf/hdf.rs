//! NetCDF-4 (HDF5) files, read through the system netCDF library.

use super::model::{Dataset, Group, Values, Variable};
use netcdf::types::{FloatType, IntType, NcVariableType};
use netcdf::AttributeValue;
use std::collections::BTreeMap;
use std::path::Path;
use testcmp_common::{Result, TestCmpError};

pub fn read(path: &Path) -> Result<Dataset> {
    let err = |e: netcdf::Error| TestCmpError::format(path, e);

    let file = netcdf::open(path).map_err(err)?;
    let root = file
        .root()
        .ok_or_else(|| TestCmpError::format(path, "no root group"))?;

    Ok(Dataset {
        data_model: "NETCDF4".to_string(),
        disk_format: "HDF5".to_string(),
        file_format: "NETCDF4".to_string(),
        root: read_group(path, &root)?,
    })
}

fn read_group(path: &Path, group: &netcdf::Group<'_>) -> Result<Group> {
    let err = |e: netcdf::Error| TestCmpError::format(path, e);

    let mut attributes = BTreeMap::new();
    for attr in group.attributes() {
        attributes.insert(attr.name().to_string(), attribute_values(attr.value().map_err(err)?));
    }

    let dimensions = group
        .dimensions()
        .map(|d| (d.name().to_string(), d.len()))
        .collect();

    let mut variables = BTreeMap::new();
    for var in group.variables() {
        variables.insert(var.name().to_string(), read_variable(path, &var)?);
    }

    let mut groups = BTreeMap::new();
    for child in group.groups() {
        groups.insert(child.name().to_string(), read_group(path, &child)?);
    }

    Ok(Group {
        attributes,
        dimensions,
        variables,
        groups,
    })
}

fn read_variable(path: &Path, var: &netcdf::Variable<'_>) -> Result<Variable> {
    let err = |e: netcdf::Error| TestCmpError::format(path, e);

    let mut attributes = BTreeMap::new();
    for attr in var.attributes() {
        attributes.insert(attr.name().to_string(), attribute_values(attr.value().map_err(err)?));
    }

    let mut filters = BTreeMap::new();
    if let Some(chunks) = var.chunking().map_err(err)? {
        filters.insert("chunking".to_string(), format!("{:?}", chunks));
    }

    let data = match var.vartype() {
        NcVariableType::Int(IntType::I8) => Values::Byte(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::U8) => Values::UByte(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::I16) => Values::Short(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::U16) => Values::UShort(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::I32) => Values::Int(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::U32) => Values::UInt(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::I64) => Values::Int64(var.get_values(..).map_err(err)?),
        NcVariableType::Int(IntType::U64) => Values::UInt64(var.get_values(..).map_err(err)?),
        NcVariableType::Float(FloatType::F32) => Values::Float(var.get_values(..).map_err(err)?),
        NcVariableType::Float(FloatType::F64) => Values::Double(var.get_values(..).map_err(err)?),
        NcVariableType::Char => Values::Char(var.get_values(..).map_err(err)?),
        other => {
            return Err(TestCmpError::format(
                path,
                format!("variable {}: type {:?} not supported", var.name(), other),
            ))
        }
    };

    Ok(Variable {
        dimensions: var.dimensions().iter().map(|d| d.name().to_string()).collect(),
        shape: var.dimensions().iter().map(|d| d.len()).collect(),
        attributes,
        filters,
        data,
    })
}

fn attribute_values(value: AttributeValue) -> Values {
    use AttributeValue as A;

    match value {
        A::Schar(x) => Values::Byte(vec![x]),
        A::Schars(x) => Values::Byte(x),
        A::Uchar(x) => Values::UByte(vec![x]),
        A::Uchars(x) => Values::UByte(x),
        A::Short(x) => Values::Short(vec![x]),
        A::Shorts(x) => Values::Short(x),
        A::Ushort(x) => Values::UShort(vec![x]),
        A::Ushorts(x) => Values::UShort(x),
        A::Int(x) => Values::Int(vec![x]),
        A::Ints(x) => Values::Int(x),
        A::Uint(x) => Values::UInt(vec![x]),
        A::Uints(x) => Values::UInt(x),
        A::Longlong(x) => Values::Int64(vec![x]),
        A::Longlongs(x) => Values::Int64(x),
        A::Ulonglong(x) => Values::UInt64(vec![x]),
        A::Ulonglongs(x) => Values::UInt64(x),
        A::Float(x) => Values::Float(vec![x]),
        A::Floats(x) => Values::Float(x),
        A::Double(x) => Values::Double(vec![x]),
        A::Doubles(x) => Values::Double(x),
        A::Str(x) => Values::Char(x.into_bytes()),
        A::Strs(x) => Values::Str(x),
    }
}
