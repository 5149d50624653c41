//! Buffer & precision layer (component A).
//!
//! Typed dense row-major n-d buffers at four precisions, plus the
//! initialization operations that fill them. Dispatch is by matching on
//! the [`Precision`] variant rather than through a per-buffer virtual
//! interface.

mod init_op;

pub use init_op::InitOp;

use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{TensorcError, TensorcResult};
use crate::session::Session;

/// The four element precisions a buffer may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Precision {
    Byte,
    Half,
    Single,
    Double,
}

impl Precision {
    /// Element width in bytes.
    pub fn width_bytes(self) -> usize {
        match self {
            Precision::Byte => 1,
            Precision::Half => 2,
            Precision::Single => 4,
            Precision::Double => 8,
        }
    }
}

/// Backing storage for a [`Buffer`], one variant per [`Precision`].
#[derive(Debug, Clone, PartialEq)]
pub enum BufferData {
    Byte(Vec<u8>),
    Half(Vec<half::f16>),
    Single(Vec<f32>),
    Double(Vec<f64>),
}

impl BufferData {
    fn len(&self) -> usize {
        match self {
            BufferData::Byte(v) => v.len(),
            BufferData::Half(v) => v.len(),
            BufferData::Single(v) => v.len(),
            BufferData::Double(v) => v.len(),
        }
    }

    fn zeroed(precision: Precision, len: usize) -> Self {
        match precision {
            Precision::Byte => BufferData::Byte(vec![0u8; len]),
            Precision::Half => BufferData::Half(vec![half::f16::from_f32(0.0); len]),
            Precision::Single => BufferData::Single(vec![0.0f32; len]),
            Precision::Double => BufferData::Double(vec![0.0f64; len]),
        }
    }

    fn get_as_float(&self, offset: usize) -> f64 {
        match self {
            BufferData::Byte(v) => v[offset] as f64,
            BufferData::Half(v) => v[offset].to_f64(),
            BufferData::Single(v) => v[offset] as f64,
            BufferData::Double(v) => v[offset],
        }
    }

    fn set_from_float(&mut self, offset: usize, value: f64) -> TensorcResult<()> {
        match self {
            BufferData::Byte(v) => {
                let rounded = value.round();
                if !(0.0..=255.0).contains(&rounded) {
                    return Err(TensorcError::user_input(format!(
                        "byte precision overflow: value {value} does not fit in [0, 255]"
                    )));
                }
                v[offset] = rounded as u8;
            }
            BufferData::Half(v) => v[offset] = half::f16::from_f64(value),
            BufferData::Single(v) => v[offset] = value as f32,
            BufferData::Double(v) => v[offset] = value,
        }
        Ok(())
    }
}

/// A dense row-major n-dimensional buffer tagged with its precision.
///
/// Size-zero buffers are legal ("void").
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    precision: Precision,
    dims: Vec<usize>,
    data: BufferData,
}

impl Buffer {
    /// Creates a buffer of the given precision and dims, filled by `init_op`.
    pub fn create(
        precision: Precision,
        dims: Vec<usize>,
        init_op: &InitOp,
        session: &mut Session,
    ) -> TensorcResult<Self> {
        let len: usize = dims.iter().product();
        let mut buffer = Buffer {
            precision,
            dims,
            data: BufferData::zeroed(precision, len),
        };
        buffer.reset(init_op, session)?;
        Ok(buffer)
    }

    /// Re-applies `init_op` to this buffer's storage without reallocating
    /// its dims.
    pub fn reset(&mut self, init_op: &InitOp, session: &mut Session) -> TensorcResult<()> {
        init_op::apply(self, init_op, session)
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_in_bytes(&self) -> usize {
        self.len() * self.precision.width_bytes()
    }

    fn linear_offset(&self, idcs: &[usize]) -> TensorcResult<usize> {
        if idcs.len() != self.dims.len() {
            return Err(TensorcError::runtime(
                "<buffer>",
                idcs.to_vec(),
                format!(
                    "expected {} indices, got {}",
                    self.dims.len(),
                    idcs.len()
                ),
            ));
        }
        let mut offset = 0usize;
        for (idx, dim) in idcs.iter().zip(self.dims.iter()) {
            if *idx >= *dim {
                return Err(TensorcError::runtime(
                    "<buffer>",
                    idcs.to_vec(),
                    format!("index {idx} out of bounds for dim of size {dim}"),
                ));
            }
            offset = offset * dim + idx;
        }
        Ok(offset)
    }

    pub fn get_as_float(&self, idcs: &[usize]) -> TensorcResult<f64> {
        let offset = self.linear_offset(idcs)?;
        Ok(self.data.get_as_float(offset))
    }

    pub fn set_from_float(&mut self, idcs: &[usize], value: f64) -> TensorcResult<()> {
        let offset = self.linear_offset(idcs)?;
        self.data.set_from_float(offset, value)
    }

    /// Folds over every cell in row-major order.
    pub fn fold<T>(&self, init: T, mut f: impl FnMut(T, f64) -> T) -> T {
        let mut acc = init;
        for offset in 0..self.data.len() {
            acc = f(acc, self.data.get_as_float(offset));
        }
        acc
    }

    pub fn fill_from_float(&mut self, value: f64) {
        for offset in 0..self.data.len() {
            // set_from_float only fails on byte overflow; callers filling
            // with an out-of-range value for byte precision get the error
            // surfaced via `try_fill_from_float`.
            let _ = self.data.set_from_float(offset, value);
        }
    }

    pub fn try_fill_from_float(&mut self, value: f64) -> TensorcResult<()> {
        for offset in 0..self.data.len() {
            self.data.set_from_float(offset, value)?;
        }
        Ok(())
    }

    /// Picks a 1-d line out of the buffer by fixing every axis except
    /// `axis`, used for plotting.
    pub fn retrieve_1d(&self, axis: usize, fixed: &[usize]) -> TensorcResult<Vec<f64>> {
        if axis >= self.dims.len() {
            return Err(TensorcError::user_input(format!(
                "axis {axis} out of range for {} dims",
                self.dims.len()
            )));
        }
        let mut idcs = fixed.to_vec();
        let mut out = Vec::with_capacity(self.dims[axis]);
        for i in 0..self.dims[axis] {
            idcs[axis] = i;
            out.push(self.get_as_float(&idcs)?);
        }
        Ok(out)
    }

    /// Picks a 2-d plane out of the buffer by fixing every axis except
    /// `axes`, used for plotting.
    pub fn retrieve_2d(&self, axes: (usize, usize), fixed: &[usize]) -> TensorcResult<Vec<Vec<f64>>> {
        let (row_axis, col_axis) = axes;
        if row_axis >= self.dims.len() || col_axis >= self.dims.len() {
            return Err(TensorcError::user_input("axis out of range"));
        }
        let mut idcs = fixed.to_vec();
        let mut out = Vec::with_capacity(self.dims[row_axis]);
        for r in 0..self.dims[row_axis] {
            idcs[row_axis] = r;
            let mut row = Vec::with_capacity(self.dims[col_axis]);
            for c in 0..self.dims[col_axis] {
                idcs[col_axis] = c;
                row.push(self.get_as_float(&idcs)?);
            }
            out.push(row);
        }
        Ok(out)
    }

    pub fn debug_header(&self, name: &str) -> String {
        format!(
            "{name}: {:?} precision={:?} elems={}",
            self.dims,
            self.precision,
            self.len()
        )
    }
}
