//! Tensors and their binary file format.
//!
//! Tensor files follow the NNEF binary layout: a 128 bytes header (magic,
//! version, data length, rank, up to 8 extents, bits per item, item type),
//! followed by little-endian item data. Only 32 bits floats are supported.
use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::internal::*;

/// All values are 32 bits floats.
pub type Tensor = ndarray::ArrayD<f32>;

const MAGIC: [u8; 2] = [0x4E, 0xEF];
const HEADER_LEN: usize = 128;
const MAX_RANK: usize = 8;
const FLOAT_CODE: u32 = 0;

pub fn read_tensor<R: Read>(mut reader: R) -> RetraceResult<Tensor> {
    let mut magic = [0u8; 2];
    reader.read_exact(&mut magic).context("Reading tensor header")?;
    ensure!(magic == MAGIC, "Wrong magic number in tensor file: {:02x?}", magic);
    let major = reader.read_u8()?;
    let minor = reader.read_u8()?;
    ensure!((major, minor) == (1, 0), "Unsupported tensor file version {}.{}", major, minor);
    let data_len = reader.read_u32::<LE>()? as usize;
    let rank = reader.read_u32::<LE>()? as usize;
    ensure!(rank <= MAX_RANK, "Tensor rank {} exceeds {}", rank, MAX_RANK);
    let mut shape = [0u32; MAX_RANK];
    reader.read_u32_into::<LE>(&mut shape)?;
    let shape: Vec<usize> = shape[..rank].iter().map(|d| *d as usize).collect();
    let bits = reader.read_u32::<LE>()?;
    let code = reader.read_u32::<LE>()?;
    ensure!(
        bits == 32 && code == FLOAT_CODE,
        "Only f32 tensors are supported (bits {}, code {})",
        bits,
        code
    );
    let mut padding = [0u8; HEADER_LEN - 4 - 4 - 4 - 4 * MAX_RANK - 4 - 4];
    reader.read_exact(&mut padding)?;
    let len = shape
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(*d))
        .with_context(|| format!("Tensor shape {shape:?} overflows"))?;
    let byte_len =
        len.checked_mul(4).with_context(|| format!("Tensor shape {shape:?} overflows"))?;
    ensure!(
        data_len == byte_len,
        "Tensor data length is {} bytes, shape {:?} needs {}",
        data_len,
        shape,
        byte_len
    );
    let mut data = vec![0f32; len];
    reader.read_f32_into::<LE>(&mut data).context("Reading tensor data")?;
    Ok(Tensor::from_shape_vec(shape, data)?)
}

pub fn write_tensor<W: Write>(mut w: W, tensor: &Tensor) -> RetraceResult<()> {
    ensure!(tensor.ndim() <= MAX_RANK, "Tensor rank {} exceeds {}", tensor.ndim(), MAX_RANK);
    let data_len = tensor
        .len()
        .checked_mul(4)
        .and_then(|l| u32::try_from(l).ok())
        .with_context(|| format!("Tensor {:?} is too large for a tensor file", tensor.shape()))?;
    let mut extents = [0u32; MAX_RANK];
    for (slot, d) in extents.iter_mut().zip(tensor.shape()) {
        *slot = u32::try_from(*d).context("Tensor extent does not fit in a tensor file")?;
    }
    w.write_all(&MAGIC)?;
    w.write_u8(1)?;
    w.write_u8(0)?;
    w.write_u32::<LE>(data_len)?;
    w.write_u32::<LE>(tensor.ndim() as u32)?;
    for extent in extents {
        w.write_u32::<LE>(extent)?;
    }
    w.write_u32::<LE>(32)?;
    w.write_u32::<LE>(FLOAT_CODE)?;
    w.write_all(&[0u8; HEADER_LEN - 4 - 4 - 4 - 4 * MAX_RANK - 4 - 4])?;
    for x in tensor.iter() {
        w.write_f32::<LE>(*x)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let t = Tensor::from_shape_vec(vec![2, 3], (0..6).map(|x| x as f32).collect()).unwrap();
        let mut buf = vec![];
        write_tensor(&mut buf, &t).unwrap();
        assert_eq!(buf.len(), 128 + 24);
        assert_eq!(&buf[0..4], &[0x4E, 0xEF, 1, 0]);
        assert_eq!(&buf[4..8], &24u32.to_le_bytes());
        assert_eq!(&buf[8..12], &2u32.to_le_bytes());
        assert_eq!(&buf[128..132], &0f32.to_le_bytes());
        assert_eq!(read_tensor(&*buf).unwrap(), t);
    }

    #[test]
    fn non_contiguous_and_scalar() {
        let t = Tensor::from_shape_vec(vec![2, 3], (0..6).map(|x| x as f32).collect()).unwrap();
        let t = t.reversed_axes();
        let mut buf = vec![];
        write_tensor(&mut buf, &t).unwrap();
        assert_eq!(read_tensor(&*buf).unwrap(), t);
        let s = Tensor::from_elem(ndarray::IxDyn(&[]), 4.5);
        let mut buf = vec![];
        write_tensor(&mut buf, &s).unwrap();
        assert_eq!(read_tensor(&*buf).unwrap(), s);
    }

    #[test]
    fn reject_truncated() {
        let t = Tensor::from_elem(vec![4], 1.0);
        let mut buf = vec![];
        write_tensor(&mut buf, &t).unwrap();
        buf.truncate(130);
        assert!(read_tensor(&*buf).is_err());
        buf[0] = 0;
        assert!(read_tensor(&*buf).is_err());
    }

    #[test]
    fn reject_overflowing_extents() {
        let mut buf = vec![0x4E, 0xEF, 1, 0];
        buf.extend(0u32.to_le_bytes());
        buf.extend(8u32.to_le_bytes());
        for _ in 0..8 {
            buf.extend(u32::MAX.to_le_bytes());
        }
        buf.extend(32u32.to_le_bytes());
        buf.extend(0u32.to_le_bytes());
        buf.resize(128, 0);
        let err = read_tensor(&*buf).unwrap_err();
        assert!(format!("{err:#}").contains("overflows"), "{err:#}");
    }
}
