//! Typed, named columns and per-column type inference.

use std::collections::HashMap;
use std::fmt;
use std::io;

use crate::{ReadError, ReadResult};

/// Column value type, in inference precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    Int64,
    Float64,
    Bool,
    Utf8,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
            DType::Bool => "bool",
            DType::Utf8 => "utf8",
        })
    }
}

/// Values of one column; `None` marks a null (empty field).
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Int64(Vec<Option<i64>>),
    Float64(Vec<Option<f64>>),
    Bool(Vec<Option<bool>>),
    Utf8(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Int64(v) => v.len(),
            ColumnValues::Float64(v) => v.len(),
            ColumnValues::Bool(v) => v.len(),
            ColumnValues::Utf8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            ColumnValues::Int64(_) => DType::Int64,
            ColumnValues::Float64(_) => DType::Float64,
            ColumnValues::Bool(_) => DType::Bool,
            ColumnValues::Utf8(_) => DType::Utf8,
        }
    }

    pub fn as_int64(&self) -> Option<&[Option<i64>]> {
        match self {
            ColumnValues::Int64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float64(&self) -> Option<&[Option<f64>]> {
        match self {
            ColumnValues::Float64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[Option<bool>]> {
        match self {
            ColumnValues::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_utf8(&self) -> Option<&[Option<String>]> {
        match self {
            ColumnValues::Utf8(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// Parsed tabular result: ordered named columns aligned by row index.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Global index of this table's first row; non-zero for chunked batches.
    pub start_row: usize,
    pub columns: Vec<Column>,
}

impl Table {
    pub(crate) fn empty(names: &[String]) -> Table {
        Table {
            start_row: 0,
            columns: names
                .iter()
                .map(|name| Column {
                    name: name.clone(),
                    values: ColumnValues::Utf8(Vec::new()),
                })
                .collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Build a table from string rows, inferring each column's dtype over
    /// all of its values unless `overrides` pins one. Short rows pad with
    /// nulls; extra fields beyond the named columns are dropped.
    pub(crate) fn from_rows(
        names: &[String],
        rows: Vec<Vec<String>>,
        overrides: &HashMap<String, DType>,
        start_row: usize,
    ) -> ReadResult<Table> {
        let mut columns = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let raw: Vec<&str> = rows
                .iter()
                .map(|row| row.get(idx).map(String::as_str).unwrap_or(""))
                .collect();
            let dtype = overrides
                .get(name)
                .copied()
                .unwrap_or_else(|| infer_dtype(&raw));
            let values = typed_values(&raw, dtype, name, start_row)?;
            columns.push(Column {
                name: name.clone(),
                values,
            });
        }
        Ok(Table { start_row, columns })
    }

    /// Concatenate chunked batches back into one table. Dtypes must match
    /// across batches, except Int64 unifies into Float64.
    pub fn concat(batches: &[Table]) -> ReadResult<Table> {
        let Some(first) = batches.first() else {
            return Ok(Table {
                start_row: 0,
                columns: Vec::new(),
            });
        };
        let names = first.column_names();
        for table in batches {
            if table.column_names() != names {
                return Err(ReadError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "batches have differing column sets",
                )));
            }
        }
        let mut columns = Vec::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            let mut dtype = first.columns[idx].values.dtype();
            for table in &batches[1..] {
                dtype = unify(dtype, table.columns[idx].values.dtype(), name)?;
            }
            let mut values = match dtype {
                DType::Int64 => ColumnValues::Int64(Vec::new()),
                DType::Float64 => ColumnValues::Float64(Vec::new()),
                DType::Bool => ColumnValues::Bool(Vec::new()),
                DType::Utf8 => ColumnValues::Utf8(Vec::new()),
            };
            for table in batches {
                append(&mut values, &table.columns[idx].values);
            }
            columns.push(Column {
                name: (*name).to_string(),
                values,
            });
        }
        Ok(Table {
            start_row: first.start_row,
            columns,
        })
    }
}

fn unify(left: DType, right: DType, column: &str) -> ReadResult<DType> {
    match (left, right) {
        (l, r) if l == r => Ok(l),
        (DType::Int64, DType::Float64) | (DType::Float64, DType::Int64) => Ok(DType::Float64),
        (left, right) => Err(ReadError::DTypeMismatch {
            column: column.to_string(),
            left,
            right,
        }),
    }
}

fn append(dst: &mut ColumnValues, src: &ColumnValues) {
    match (dst, src) {
        (ColumnValues::Int64(d), ColumnValues::Int64(s)) => d.extend(s.iter().copied()),
        (ColumnValues::Float64(d), ColumnValues::Float64(s)) => d.extend(s.iter().copied()),
        (ColumnValues::Float64(d), ColumnValues::Int64(s)) => {
            d.extend(s.iter().map(|v| v.map(|v| v as f64)))
        }
        (ColumnValues::Bool(d), ColumnValues::Bool(s)) => d.extend(s.iter().copied()),
        (ColumnValues::Utf8(d), ColumnValues::Utf8(s)) => d.extend(s.iter().cloned()),
        _ => unreachable!("dtypes were unified"),
    }
}

/// Integer > float > boolean > string; empty fields are nulls and do not
/// constrain the type.
fn infer_dtype(values: &[&str]) -> DType {
    let mut seen = false;
    let mut could_int = true;
    let mut could_float = true;
    let mut could_bool = true;
    for value in values {
        if value.is_empty() {
            continue;
        }
        seen = true;
        if could_int && value.parse::<i64>().is_err() {
            could_int = false;
        }
        if could_float && value.parse::<f64>().is_err() {
            could_float = false;
        }
        if could_bool && parse_bool(value).is_none() {
            could_bool = false;
        }
        if !could_int && !could_float && !could_bool {
            break;
        }
    }
    if !seen {
        return DType::Utf8;
    }
    if could_int {
        DType::Int64
    } else if could_float {
        DType::Float64
    } else if could_bool {
        DType::Bool
    } else {
        DType::Utf8
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "True" | "TRUE" => Some(true),
        "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

fn typed_values(
    raw: &[&str],
    dtype: DType,
    column: &str,
    start_row: usize,
) -> ReadResult<ColumnValues> {
    Ok(match dtype {
        DType::Int64 => ColumnValues::Int64(collect(raw, column, start_row, dtype, |v| {
            v.parse::<i64>().ok()
        })?),
        DType::Float64 => ColumnValues::Float64(collect(raw, column, start_row, dtype, |v| {
            v.parse::<f64>().ok()
        })?),
        DType::Bool => ColumnValues::Bool(collect(raw, column, start_row, dtype, parse_bool)?),
        DType::Utf8 => ColumnValues::Utf8(
            raw.iter()
                .map(|v| {
                    if v.is_empty() {
                        None
                    } else {
                        Some((*v).to_string())
                    }
                })
                .collect(),
        ),
    })
}

fn collect<T>(
    raw: &[&str],
    column: &str,
    start_row: usize,
    dtype: DType,
    parse: impl Fn(&str) -> Option<T>,
) -> ReadResult<Vec<Option<T>>> {
    raw.iter()
        .enumerate()
        .map(|(i, v)| {
            if v.is_empty() {
                return Ok(None);
            }
            parse(v).map(Some).ok_or_else(|| ReadError::ColumnType {
                column: column.to_string(),
                row: start_row + i,
                value: (*v).to_string(),
                dtype,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: &[&str]) -> Vec<String> {
        n.iter().map(|s| s.to_string()).collect()
    }

    fn rows(r: &[&[&str]]) -> Vec<Vec<String>> {
        r.iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn inference_precedence() {
        assert_eq!(infer_dtype(&["1", "2", "-3"]), DType::Int64);
        assert_eq!(infer_dtype(&["1", "2.5"]), DType::Float64);
        assert_eq!(infer_dtype(&["true", "False"]), DType::Bool);
        assert_eq!(infer_dtype(&["true", "maybe"]), DType::Utf8);
        assert_eq!(infer_dtype(&["1", "x"]), DType::Utf8);
    }

    #[test]
    fn empty_fields_are_nulls_and_do_not_constrain() {
        let table = Table::from_rows(
            &names(&["a"]),
            rows(&[&["1"], &[""], &["3"]]),
            &HashMap::new(),
            0,
        )
        .unwrap();
        assert_eq!(
            table.column("a").unwrap().values,
            ColumnValues::Int64(vec![Some(1), None, Some(3)])
        );
    }

    #[test]
    fn all_empty_column_is_utf8_nulls() {
        assert_eq!(infer_dtype(&["", ""]), DType::Utf8);
    }

    #[test]
    fn override_forces_dtype() {
        let mut overrides = HashMap::new();
        overrides.insert("a".to_string(), DType::Float64);
        let table =
            Table::from_rows(&names(&["a"]), rows(&[&["1"], &["2"]]), &overrides, 0).unwrap();
        assert_eq!(
            table.column("a").unwrap().values,
            ColumnValues::Float64(vec![Some(1.0), Some(2.0)])
        );
    }

    #[test]
    fn override_failure_reports_position() {
        let mut overrides = HashMap::new();
        overrides.insert("a".to_string(), DType::Int64);
        let err = Table::from_rows(&names(&["a"]), rows(&[&["1"], &["x"]]), &overrides, 10)
            .unwrap_err();
        match err {
            ReadError::ColumnType { column, row, .. } => {
                assert_eq!(column, "a");
                assert_eq!(row, 11);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn concat_promotes_int_to_float() {
        let a = Table::from_rows(&names(&["x"]), rows(&[&["1"]]), &HashMap::new(), 0).unwrap();
        let b = Table::from_rows(&names(&["x"]), rows(&[&["2.5"]]), &HashMap::new(), 1).unwrap();
        let merged = Table::concat(&[a, b]).unwrap();
        assert_eq!(
            merged.column("x").unwrap().values,
            ColumnValues::Float64(vec![Some(1.0), Some(2.5)])
        );
    }

    #[test]
    fn concat_rejects_irreconcilable_dtypes() {
        let a = Table::from_rows(&names(&["x"]), rows(&[&["true"]]), &HashMap::new(), 0).unwrap();
        let b = Table::from_rows(&names(&["x"]), rows(&[&["word"]]), &HashMap::new(), 1).unwrap();
        assert!(matches!(
            Table::concat(&[a, b]),
            Err(ReadError::DTypeMismatch { .. })
        ));
    }
}
