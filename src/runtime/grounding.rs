//! Groundings: tensors with labelled leading axes.
//!
//! During evaluation every intermediate value carries one leading axis per
//! variable it depends on: the shared assignment batch axis, and one axis per
//! enclosing quantifier. Trailing axes are element dimensions. Axes are kept
//! sorted (batch first, then quantifiers outermost first), so aligning two
//! groundings never needs a permutation.

use candle_core::Tensor;

use crate::error::{FtlError, Result};

/// Label of a leading axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Axis {
    /// Rows of the assignment
    Batch,
    /// Domain of the quantifier at this nesting level
    Bound(usize),
}

#[derive(Debug, Clone)]
pub struct Grounding {
    pub tensor: Tensor,
    pub axes: Vec<Axis>,
}

impl Grounding {
    /// A value that depends on no variable.
    pub fn constant(tensor: Tensor) -> Self {
        Self {
            tensor,
            axes: Vec::new(),
        }
    }

    pub fn new(tensor: Tensor, axis: Axis) -> Self {
        Self {
            tensor,
            axes: vec![axis],
        }
    }

    /// Extent of each leading axis.
    pub fn axis_sizes(&self) -> Result<Vec<usize>> {
        let dims = self.tensor.dims();
        if dims.len() < self.axes.len() {
            return Err(FtlError::Usage(format!(
                "tensor of shape {:?} cannot carry {} variable axes",
                dims,
                self.axes.len()
            )));
        }
        Ok(dims[..self.axes.len()].to_vec())
    }

    /// Trailing element dimensions.
    pub fn element_dims(&self) -> &[usize] {
        &self.tensor.dims()[self.axes.len()..]
    }

    pub fn position(&self, axis: Axis) -> Option<usize> {
        self.axes.iter().position(|a| *a == axis)
    }
}

/// The union of the groundings' axes with their extents, sorted.
pub fn joint_axes(groundings: &[&Grounding]) -> Result<(Vec<Axis>, Vec<usize>)> {
    let mut joint: Vec<(Axis, usize)> = Vec::new();
    for g in groundings {
        for (axis, size) in g.axes.iter().zip(g.axis_sizes()?) {
            match joint.iter().find(|(a, _)| a == axis) {
                Some((_, known)) if *known != size => {
                    return Err(FtlError::Usage(format!(
                        "axis {:?} has inconsistent extents {} and {}",
                        axis, known, size
                    )))
                }
                Some(_) => {}
                None => joint.push((*axis, size)),
            }
        }
    }
    joint.sort_by_key(|(axis, _)| *axis);
    Ok(joint.into_iter().unzip())
}

/// Expand `g` onto `axes` (a sorted superset of its own), broadcasting the
/// axes it lacks. Element dimensions are kept.
pub fn expand(g: &Grounding, axes: &[Axis], sizes: &[usize]) -> Result<Tensor> {
    let mut t = g.tensor.clone();
    for (i, axis) in axes.iter().enumerate() {
        if !g.axes.contains(axis) {
            t = t.unsqueeze(i)?;
        }
    }
    let mut shape = sizes.to_vec();
    shape.extend_from_slice(g.element_dims());
    Ok(t.broadcast_as(shape)?)
}

/// Align several groundings onto their joint axes.
pub fn align(groundings: &[&Grounding]) -> Result<(Vec<Axis>, Vec<usize>, Vec<Tensor>)> {
    let (axes, sizes) = joint_axes(groundings)?;
    let tensors = groundings
        .iter()
        .map(|g| expand(g, &axes, &sizes))
        .collect::<Result<Vec<_>>>()?;
    Ok((axes, sizes, tensors))
}

/// Collapse the leading axes of an aligned tensor into one batch axis:
/// `[s1, .., sk, e..]` to `[s1 * .. * sk, e..]`.
pub fn flatten_axes(t: &Tensor, sizes: &[usize]) -> Result<Tensor> {
    let rows: usize = sizes.iter().product();
    let mut shape = vec![rows];
    shape.extend_from_slice(&t.dims()[sizes.len()..]);
    Ok(t.contiguous()?.reshape(shape)?)
}

/// Inverse of [`flatten_axes`]: `[rows, e..]` to `[s1, .., sk, e..]`.
pub fn unflatten_axes(t: &Tensor, sizes: &[usize]) -> Result<Tensor> {
    let mut shape = sizes.to_vec();
    shape.extend_from_slice(&t.dims()[1..]);
    Ok(t.reshape(shape)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_align_broadcasts_missing_axes() {
        let dev = Device::Cpu;
        // f(b) over batch of 2, g(x) over a quantifier domain of 3
        let f = Grounding::new(Tensor::new(&[1.0f32, 2.0], &dev).unwrap(), Axis::Batch);
        let g = Grounding::new(Tensor::new(&[10.0f32, 20.0, 30.0], &dev).unwrap(), Axis::Bound(0));
        let (axes, sizes, tensors) = align(&[&f, &g]).unwrap();
        assert_eq!(axes, vec![Axis::Batch, Axis::Bound(0)]);
        assert_eq!(sizes, vec![2, 3]);
        let sum = (&tensors[0] + &tensors[1]).unwrap();
        assert_eq!(
            sum.to_vec2::<f32>().unwrap(),
            vec![vec![11.0, 21.0, 31.0], vec![12.0, 22.0, 32.0]]
        );
    }

    #[test]
    fn test_element_dims_survive_alignment() {
        let dev = Device::Cpu;
        let emb = Grounding::new(Tensor::zeros((4, 5), candle_core::DType::F32, &dev).unwrap(), Axis::Bound(1));
        let other = Grounding::new(Tensor::zeros(2, candle_core::DType::F32, &dev).unwrap(), Axis::Bound(0));
        let (_, sizes, tensors) = align(&[&emb, &other]).unwrap();
        assert_eq!(tensors[0].dims(), &[2, 4, 5]);
        let flat = flatten_axes(&tensors[0], &sizes).unwrap();
        assert_eq!(flat.dims(), &[8, 5]);
        assert_eq!(unflatten_axes(&flat, &sizes).unwrap().dims(), &[2, 4, 5]);
    }

    #[test]
    fn test_constant_has_no_axes() {
        let c = Grounding::constant(Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap());
        let (axes, sizes, tensors) = align(&[&c]).unwrap();
        assert!(axes.is_empty() && sizes.is_empty());
        assert_eq!(tensors[0].dims(), &[3]);
        assert_eq!(flatten_axes(&tensors[0], &sizes).unwrap().dims(), &[1, 3]);
    }

    #[test]
    fn test_inconsistent_extent() {
        let dev = Device::Cpu;
        let a = Grounding::new(Tensor::zeros(2, candle_core::DType::F32, &dev).unwrap(), Axis::Batch);
        let b = Grounding::new(Tensor::zeros(3, candle_core::DType::F32, &dev).unwrap(), Axis::Batch);
        assert!(align(&[&a, &b]).is_err());
    }
}
