//! Minimal reader for MATLAB Level 5 MAT-files.
//!
//! Covers what dataset index files use: cell arrays, structs, character arrays and
//! real numeric arrays, optionally zlib-compressed (`miCOMPRESSED`), in either byte
//! order. Sparse, object and function-handle arrays are reported as
//! [`MatValue::Unsupported`]. MAT v7.3 files are HDF5 containers and are rejected.

use std::{io::Read, path::Path};

use flate2::read::ZlibDecoder;

use crate::error::{DatasetError, DatasetResult};

const HEADER_LEN: usize = 128;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;
const MI_UTF8: u32 = 16;
const MI_UTF16: u32 = 17;
const MI_UTF32: u32 = 18;

const MX_CELL: u8 = 1;
const MX_STRUCT: u8 = 2;
const MX_CHAR: u8 = 4;
const MX_DOUBLE: u8 = 6;
const MX_UINT64: u8 = 15;

/// A decoded MATLAB array.
#[derive(Debug, Clone, PartialEq)]
pub enum MatValue {
    /// Character array; multi-row arrays are joined with `\n`.
    Char(String),
    /// Real part of a numeric array, column-major, widened to `f64`.
    Numeric { dims: Vec<usize>, data: Vec<f64> },
    /// Cell array, column-major.
    Cell {
        dims: Vec<usize>,
        items: Vec<MatValue>,
    },
    /// Struct array; `elements[i][f]` is field `fields[f]` of element `i`.
    /// `elements` is empty when the struct has no fields.
    Struct {
        dims: Vec<usize>,
        fields: Vec<String>,
        elements: Vec<Vec<MatValue>>,
    },
    /// Empty matrix element.
    Empty,
    /// Array class this reader does not decode.
    Unsupported { class: u8 },
}

impl MatValue {
    /// Field `name` of the first element of a struct array.
    pub fn field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Struct {
                fields, elements, ..
            } => {
                let idx = fields.iter().position(|f| f == name)?;
                elements.first()?.get(idx)
            }
            _ => None,
        }
    }

    /// Text of a character array.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Char(s) => Some(s),
            _ => None,
        }
    }

    /// Items of a cell array.
    pub fn cell_items(&self) -> Option<&[Self]> {
        match self {
            Self::Cell { items, .. } => Some(items),
            _ => None,
        }
    }

    /// A cell array of character arrays as owned strings. Empty cells become `""`.
    pub fn strings(&self) -> Option<Vec<String>> {
        self.cell_items()?
            .iter()
            .map(|item| match item {
                Self::Char(s) => Some(s.clone()),
                Self::Empty => Some(String::new()),
                _ => None,
            })
            .collect()
    }
}

/// Named top-level variables of a MAT-file, in file order.
#[derive(Debug, Clone, Default)]
pub struct MatFile {
    variables: Vec<(String, MatValue)>,
}

impl MatFile {
    /// Read and decode the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> DatasetResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| DatasetError::IndexReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Decode a MAT-file held in memory.
    pub fn parse(bytes: &[u8]) -> DatasetResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(invalid("file shorter than the 128-byte header"));
        }
        let big_endian = match &bytes[126..128] {
            b"IM" => false,
            b"MI" => true,
            other => return Err(invalid(format!("bad endian indicator {other:?}"))),
        };
        let mut reader = Reader::new(&bytes[HEADER_LEN..], big_endian);
        let version = if big_endian {
            u16::from_be_bytes([bytes[124], bytes[125]])
        } else {
            u16::from_le_bytes([bytes[124], bytes[125]])
        };
        if version != 0x0100 {
            return Err(invalid(format!(
                "unsupported MAT version {version:#06x} (only Level 5 is supported)"
            )));
        }

        let mut variables = Vec::new();
        while !reader.is_at_end() {
            let (ty, data) = reader.element()?;
            match ty {
                MI_MATRIX => variables.push(parse_matrix(data, big_endian)?),
                MI_COMPRESSED => {
                    let mut inflated = Vec::new();
                    ZlibDecoder::new(data)
                        .read_to_end(&mut inflated)
                        .map_err(|e| invalid(format!("zlib: {e}")))?;
                    let mut inner = Reader::new(&inflated, big_endian);
                    let (inner_ty, inner_data) = inner.element()?;
                    if inner_ty == MI_MATRIX {
                        variables.push(parse_matrix(inner_data, big_endian)?);
                    }
                }
                other => tracing::debug!(data_type = other, "skipping top-level MAT element"),
            }
        }
        Ok(Self { variables })
    }

    /// Variable named `name`.
    pub fn get(&self, name: &str) -> Option<&MatValue> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Names of all variables.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.iter().map(|(n, _)| n.as_str())
    }
}

fn invalid(reason: impl Into<String>) -> DatasetError {
    DatasetError::InvalidMatFile {
        reason: reason.into(),
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    big_endian: bool,
}

impl<'a> Reader<'a> {
    const fn new(data: &'a [u8], big_endian: bool) -> Self {
        Self {
            data,
            pos: 0,
            big_endian,
        }
    }

    const fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    const fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Fail unless `count` nested elements can fit in the remaining bytes.
    fn check_nested(&self, count: usize) -> DatasetResult<()> {
        // every element carries at least an 8-byte tag
        if count > self.remaining() / 8 {
            return Err(invalid(format!(
                "{count} nested elements do not fit in {} bytes",
                self.remaining()
            )));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> DatasetResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| invalid(format!("truncated element at offset {}", self.pos)))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self) -> DatasetResult<u32> {
        let b = self.take(4)?;
        let b = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian {
            u32::from_be_bytes(b)
        } else {
            u32::from_le_bytes(b)
        })
    }

    /// Next data element as `(type, payload)`, consuming its padding.
    fn element(&mut self) -> DatasetResult<(u32, &'a [u8])> {
        let word = self.u32()?;
        // The upper half of the first word is non-zero only for small elements.
        if word >> 16 != 0 {
            // Small data element: size and type share the tag, payload fits in 4 bytes.
            let size = (word >> 16) as usize;
            if size > 4 {
                return Err(invalid(format!("small element of {size} bytes")));
            }
            let payload = self.take(4)?;
            return Ok((word & 0xffff, &payload[..size]));
        }

        // Regular element: type word, byte count, payload padded to 8 bytes.
        let size = self.u32()? as usize;
        let payload = self.take(size)?;
        // Compressed payloads are not padded.
        if word != MI_COMPRESSED {
            let padding = (8 - size % 8) % 8;
            let padding = padding.min(self.data.len() - self.pos);
            self.pos += padding;
        }
        Ok((word, payload))
    }
}

fn parse_matrix(data: &[u8], big_endian: bool) -> DatasetResult<(String, MatValue)> {
    if data.is_empty() {
        return Ok((String::new(), MatValue::Empty));
    }
    let mut r = Reader::new(data, big_endian);

    // Array flags, dimensions and name precede the class-specific body.
    let (_, flags) = r.element()?;
    if flags.len() < 4 {
        return Err(invalid("array flags too short"));
    }
    let flags = decode_u32s(&flags[..4], big_endian)[0];
    let class = (flags & 0xff) as u8;

    let (dims_ty, dims) = r.element()?;
    let dims: Vec<usize> = decode_numeric(dims_ty, dims, big_endian)?
        .into_iter()
        .map(|d| d as usize)
        .collect();
    let count = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| invalid(format!("array dimensions {dims:?} overflow")))?;

    let (_, name) = r.element()?;
    let name = String::from_utf8_lossy(name).into_owned();

    let value = match class {
        MX_CELL => {
            r.check_nested(count)?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(nested_matrix(&mut r, big_endian)?);
            }
            MatValue::Cell { dims, items }
        }
        MX_STRUCT => {
            let (len_ty, len) = r.element()?;
            let field_len = decode_numeric(len_ty, len, big_endian)?
                .first()
                .copied()
                .unwrap_or(0.0) as usize;
            let (_, names) = r.element()?;
            let fields: Vec<String> = if field_len == 0 {
                Vec::new()
            } else {
                names
                    .chunks(field_len)
                    .map(|chunk| {
                        let end = chunk.iter().position(|&b| b == 0).unwrap_or(chunk.len());
                        String::from_utf8_lossy(&chunk[..end]).into_owned()
                    })
                    .collect()
            };

            let nested = count
                .checked_mul(fields.len())
                .ok_or_else(|| invalid(format!("struct of {count} elements overflows")))?;
            r.check_nested(nested)?;
            let element_count = if fields.is_empty() { 0 } else { count };
            let mut elements = Vec::with_capacity(element_count);
            for _ in 0..element_count {
                let mut values = Vec::with_capacity(fields.len());
                for _ in 0..fields.len() {
                    values.push(nested_matrix(&mut r, big_endian)?);
                }
                elements.push(values);
            }
            MatValue::Struct {
                dims,
                fields,
                elements,
            }
        }
        MX_CHAR => {
            let chars = if r.is_at_end() {
                Vec::new()
            } else {
                let (ty, payload) = r.element()?;
                decode_chars(ty, payload, big_endian)?
            };
            MatValue::Char(arrange_rows(&chars, &dims))
        }
        MX_DOUBLE..=MX_UINT64 => {
            let data = if r.is_at_end() {
                Vec::new()
            } else {
                let (ty, payload) = r.element()?;
                decode_numeric(ty, payload, big_endian)?
            };
            MatValue::Numeric { dims, data }
        }
        other => MatValue::Unsupported { class: other },
    };

    Ok((name, value))
}

fn nested_matrix(r: &mut Reader<'_>, big_endian: bool) -> DatasetResult<MatValue> {
    let (ty, payload) = r.element()?;
    if ty != MI_MATRIX {
        return Err(invalid(format!("expected miMATRIX, found type {ty}")));
    }
    Ok(parse_matrix(payload, big_endian)?.1)
}

/// Column-major `m x n` characters to `m` lines.
fn arrange_rows(chars: &[char], dims: &[usize]) -> String {
    let rows = dims.first().copied().unwrap_or(1);
    if rows <= 1 || rows > chars.len() {
        return chars.iter().collect();
    }
    let cols = chars.len() / rows;
    (0..rows)
        .map(|i| (0..cols).map(|j| chars[i + j * rows]).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_u32s(bytes: &[u8], big_endian: bool) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| {
            let b = [c[0], c[1], c[2], c[3]];
            if big_endian {
                u32::from_be_bytes(b)
            } else {
                u32::from_le_bytes(b)
            }
        })
        .collect()
}

fn decode_chars(ty: u32, bytes: &[u8], big_endian: bool) -> DatasetResult<Vec<char>> {
    Ok(match ty {
        MI_UTF8 => String::from_utf8_lossy(bytes).chars().collect(),
        MI_INT8 | MI_UINT8 => bytes.iter().map(|&b| char::from(b)).collect(),
        MI_UINT16 | MI_UTF16 => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| {
                    if big_endian {
                        u16::from_be_bytes([c[0], c[1]])
                    } else {
                        u16::from_le_bytes([c[0], c[1]])
                    }
                })
                .collect();
            char::decode_utf16(units)
                .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        }
        MI_UINT32 | MI_UTF32 => decode_u32s(bytes, big_endian)
            .into_iter()
            .map(|u| char::from_u32(u).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
        other => return Err(invalid(format!("unsupported character data type {other}"))),
    })
}

fn decode_numeric(ty: u32, bytes: &[u8], big_endian: bool) -> DatasetResult<Vec<f64>> {
    macro_rules! widen {
        ($t:ty) => {
            bytes
                .chunks_exact(std::mem::size_of::<$t>())
                .map(|c| {
                    let arr = c.try_into().unwrap_or([0; std::mem::size_of::<$t>()]);
                    if big_endian {
                        <$t>::from_be_bytes(arr) as f64
                    } else {
                        <$t>::from_le_bytes(arr) as f64
                    }
                })
                .collect()
        };
    }

    Ok(match ty {
        MI_INT8 => widen!(i8),
        MI_UINT8 => widen!(u8),
        MI_INT16 => widen!(i16),
        MI_UINT16 => widen!(u16),
        MI_INT32 => widen!(i32),
        MI_UINT32 => widen!(u32),
        MI_SINGLE => widen!(f32),
        MI_DOUBLE => widen!(f64),
        MI_INT64 => widen!(i64),
        MI_UINT64 => widen!(u64),
        other => return Err(invalid(format!("unsupported numeric data type {other}"))),
    })
}

/// Test-only MAT-file writer producing little-endian Level 5 files.
#[cfg(test)]
pub(crate) mod writer {
    use std::io::Write;

    use flate2::{write::ZlibEncoder, Compression};

    use super::*;

    pub fn header() -> Vec<u8> {
        let mut out = b"MATLAB 5.0 MAT-file, written by segforge tests".to_vec();
        out.resize(116, b' ');
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&0x0100u16.to_le_bytes());
        out.extend_from_slice(b"IM");
        out
    }

    pub fn element(ty: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
        out.extend_from_slice(data);
        out.resize(out.len() + (8 - data.len() % 8) % 8, 0);
        out
    }

    fn small_element(ty: u32, data: &[u8]) -> Vec<u8> {
        assert!(data.len() <= 4);
        let mut out = Vec::new();
        out.extend_from_slice(&(((data.len() as u32) << 16) | ty).to_le_bytes());
        let mut payload = data.to_vec();
        payload.resize(4, 0);
        out.extend_from_slice(&payload);
        out
    }

    pub fn matrix(class: u8, dims: &[i32], name: &str, body: &[u8]) -> Vec<u8> {
        let mut content = element(MI_UINT32, &[class, 0, 0, 0, 0, 0, 0, 0]);
        let dims: Vec<u8> = dims.iter().flat_map(|d| d.to_le_bytes()).collect();
        content.extend(element(MI_INT32, &dims));
        content.extend(element(MI_INT8, name.as_bytes()));
        content.extend_from_slice(body);
        element(MI_MATRIX, &content)
    }

    pub fn char_array(name: &str, text: &str) -> Vec<u8> {
        let units: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
        matrix(
            MX_CHAR,
            &[1, text.encode_utf16().count() as i32],
            name,
            &element(MI_UINT16, &units),
        )
    }

    pub fn double_array(name: &str, values: &[f64]) -> Vec<u8> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        matrix(
            MX_DOUBLE,
            &[1, values.len() as i32],
            name,
            &element(MI_DOUBLE, &bytes),
        )
    }

    pub fn cell_row(name: &str, items: &[Vec<u8>]) -> Vec<u8> {
        matrix(MX_CELL, &[1, items.len() as i32], name, &items.concat())
    }

    pub fn string_cell(name: &str, strings: &[&str]) -> Vec<u8> {
        let items: Vec<Vec<u8>> = strings.iter().map(|s| char_array("", s)).collect();
        cell_row(name, &items)
    }

    pub fn struct_scalar(name: &str, fields: &[(&str, Vec<u8>)]) -> Vec<u8> {
        const FIELD_LEN: usize = 32;
        let mut body = small_element(MI_INT32, &(FIELD_LEN as i32).to_le_bytes());
        let mut names = Vec::new();
        for (field, _) in fields {
            let mut bytes = field.as_bytes().to_vec();
            bytes.resize(FIELD_LEN, 0);
            names.extend(bytes);
        }
        body.extend(element(MI_INT8, &names));
        for (_, value) in fields {
            body.extend_from_slice(value);
        }
        matrix(MX_STRUCT, &[1, 1], name, &body)
    }

    pub fn compressed(element_bytes: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(element_bytes).unwrap();
        let zipped = encoder.finish().unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&MI_COMPRESSED.to_le_bytes());
        out.extend_from_slice(&(zipped.len() as u32).to_le_bytes());
        out.extend(zipped);
        out
    }

    /// A fine-grained ADE20K style index: struct `index` with filename/folder/objectnames.
    pub fn ade_index(
        filenames: &[&str],
        folders: &[&str],
        objectnames: &[&str],
        compress: bool,
    ) -> Vec<u8> {
        let index = struct_scalar(
            "index",
            &[
                ("filename", string_cell("", filenames)),
                ("folder", string_cell("", folders)),
                ("objectnames", string_cell("", objectnames)),
            ],
        );
        let mut out = header();
        if compress {
            out.extend(compressed(&index));
        } else {
            out.extend(index);
        }
        out
    }
}
