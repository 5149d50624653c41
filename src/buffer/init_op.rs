//! Initialization operations for buffers.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use rand::Rng;

use super::{Buffer, BufferData, Precision};
use crate::error::{TensorcError, TensorcResult};
use crate::session::Session;

/// How a freshly allocated (or reset) buffer gets its initial contents.
#[derive(Debug, Clone, PartialEq)]
pub enum InitOp {
    /// Fills from a literal array. `strict=true` requires the array length
    /// to equal the product of dims; `strict=false` cycles modulo length.
    ConstantFill { values: Vec<f64>, strict: bool },
    /// Writes the row-major linear offset of each cell.
    RangeOverOffsets,
    /// Draws IID U[0,1) from the session's RNG.
    StandardUniform,
    /// Memory-maps (in this implementation, reads) a raw row-major dump.
    /// The file's on-disk precision must equal the buffer's; size is
    /// checked against the declared dims before any data is read.
    #[cfg(feature = "std")]
    FileMapped { path: String, precision: Precision },
}

pub(super) fn apply(buffer: &mut Buffer, op: &InitOp, session: &mut Session) -> TensorcResult<()> {
    match op {
        InitOp::ConstantFill { values, strict } => apply_constant_fill(buffer, values, *strict),
        InitOp::RangeOverOffsets => apply_range_over_offsets(buffer),
        InitOp::StandardUniform => apply_standard_uniform(buffer, session),
        #[cfg(feature = "std")]
        InitOp::FileMapped { path, precision } => apply_file_mapped(buffer, path, *precision),
    }
}

fn apply_constant_fill(buffer: &mut Buffer, values: &[f64], strict: bool) -> TensorcResult<()> {
    let len = buffer.len();
    if strict && values.len() != len {
        return Err(TensorcError::user_input(format!(
            "Constant-fill{{strict=true}} expects {len} values, got {}",
            values.len()
        )));
    }
    if values.is_empty() {
        if len == 0 {
            return Ok(());
        }
        return Err(TensorcError::user_input(
            "Constant-fill requires at least one value",
        ));
    }
    for offset in 0..len {
        let value = values[offset % values.len()];
        buffer.data.set_from_float(offset, value)?;
    }
    Ok(())
}

fn apply_range_over_offsets(buffer: &mut Buffer) -> TensorcResult<()> {
    for offset in 0..buffer.len() {
        buffer.data.set_from_float(offset, offset as f64)?;
    }
    Ok(())
}

fn apply_standard_uniform(buffer: &mut Buffer, session: &mut Session) -> TensorcResult<()> {
    let rng = session.rng_mut();
    for offset in 0..buffer.len() {
        let value: f64 = rng.gen_range(0.0..1.0);
        buffer.data.set_from_float(offset, value)?;
    }
    Ok(())
}

#[cfg(feature = "std")]
fn apply_file_mapped(buffer: &mut Buffer, path: &str, precision: Precision) -> TensorcResult<()> {
    if precision != buffer.precision() {
        return Err(TensorcError::user_input(format!(
            "File-mapped precision {precision:?} does not match buffer precision {:?}",
            buffer.precision()
        )));
    }
    let expected_bytes = buffer.len() * precision.width_bytes();
    let bytes = std::fs::read(path)
        .map_err(|e| TensorcError::user_input(format!("failed to read {path}: {e}")))?;
    if bytes.len() != expected_bytes {
        return Err(TensorcError::user_input(format!(
            "File-mapped {path}: expected {expected_bytes} bytes, file has {}",
            bytes.len()
        )));
    }
    let data = match precision {
        Precision::Byte => BufferData::Byte(bytes),
        Precision::Half => BufferData::Half(
            bytes
                .chunks_exact(2)
                .map(|c| half::f16::from_le_bytes([c[0], c[1]]))
                .collect(),
        ),
        Precision::Single => BufferData::Single(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ),
        Precision::Double => BufferData::Double(
            bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ),
    };
    buffer.data = data;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn strict_constant_fill_requires_exact_length() {
        let mut session = Session::new();
        let err = Buffer::create(
            Precision::Single,
            vec![2, 2],
            &InitOp::ConstantFill {
                values: vec![1.0, 2.0],
                strict: true,
            },
            &mut session,
        )
        .unwrap_err();
        assert!(matches!(err, TensorcError::UserInput { .. }));
    }

    #[test]
    fn non_strict_constant_fill_cycles() {
        let mut session = Session::new();
        let buf = Buffer::create(
            Precision::Single,
            vec![4],
            &InitOp::ConstantFill {
                values: vec![1.0, 2.0],
                strict: false,
            },
            &mut session,
        )
        .unwrap();
        assert_eq!(buf.get_as_float(&[0]).unwrap(), 1.0);
        assert_eq!(buf.get_as_float(&[1]).unwrap(), 2.0);
        assert_eq!(buf.get_as_float(&[2]).unwrap(), 1.0);
        assert_eq!(buf.get_as_float(&[3]).unwrap(), 2.0);
    }

    #[test]
    fn standard_uniform_is_deterministic_per_seed() {
        let mut a = Session::with_seed(42);
        let mut b = Session::with_seed(42);
        let buf_a = Buffer::create(Precision::Double, vec![8], &InitOp::StandardUniform, &mut a).unwrap();
        let buf_b = Buffer::create(Precision::Double, vec![8], &InitOp::StandardUniform, &mut b).unwrap();
        assert_eq!(buf_a, buf_b);
    }

    #[test]
    fn standard_uniform_is_in_unit_interval() {
        let mut session = Session::new();
        let buf = Buffer::create(Precision::Double, vec![64], &InitOp::StandardUniform, &mut session).unwrap();
        assert!(buf.fold(true, |ok, v| ok && v >= 0.0 && v < 1.0));
    }
}
