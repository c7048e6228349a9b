//! Predicate and functor implementations.
//!
//! A predicate maps argument batches `[B, element dims..]` to truth degrees
//! `[B]` in `[0, 1]`; a functor maps them to result elements
//! `[B, result dims..]`. Trainable implementations expose their `Var`s so the
//! optimizer can reach them.

use candle_core::{DType, Device, Tensor, Var};

use crate::error::{FtlError, Result};

/// A truth-valued symbol.
///
/// Implementations must return values in `[0, 1]`; the interpretation
/// relies on it and does not clamp.
pub trait Predicate: Send + Sync {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor>;

    fn trainable_vars(&self) -> Vec<Var> {
        Vec::new()
    }
}

/// An element-valued symbol.
pub trait Functor: Send + Sync {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor>;

    fn trainable_vars(&self) -> Vec<Var> {
        Vec::new()
    }
}

/// Adapts a closure into a [`Predicate`].
pub struct FnPredicate<F>(F);

impl<F> FnPredicate<F>
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Predicate for FnPredicate<F>
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync,
{
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        (self.0)(args)
    }
}

/// Adapts a closure into a [`Functor`].
pub struct FnFunctor<F>(F);

impl<F> FnFunctor<F>
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Functor for FnFunctor<F>
where
    F: Fn(&[Tensor]) -> Result<Tensor> + Send + Sync,
{
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        (self.0)(args)
    }
}

/// View an argument batch as a `[B, features]` matrix.
fn as_features(t: &Tensor) -> Result<Tensor> {
    Ok(match t.rank() {
        0 => t.reshape((1, 1))?,
        1 => t.unsqueeze(1)?,
        2 => t.clone(),
        _ => t.flatten_from(1)?,
    })
}

/// Concatenate all arguments feature-wise.
fn concat_features(args: &[Tensor]) -> Result<Tensor> {
    let features = args.iter().map(as_features).collect::<Result<Vec<_>>>()?;
    Ok(Tensor::cat(&features, 1)?)
}

fn weight(rows: usize, cols: usize, device: &Device) -> Result<Var> {
    Ok(Var::from_tensor(&Tensor::randn(0.0f32, 0.1, (rows, cols), device)?)?)
}

/// Two-layer perceptron over the concatenated arguments:
/// `sigmoid(relu(x W1 + b1) W2 + b2)`.
pub struct MlpPredicate {
    w1: Var,
    b1: Var,
    w2: Var,
    b2: Var,
}

impl MlpPredicate {
    /// `input_dim` is the total feature width of all arguments together.
    pub fn new(input_dim: usize, hidden_dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            w1: weight(input_dim, hidden_dim, device)?,
            b1: Var::zeros(hidden_dim, DType::F32, device)?,
            w2: weight(hidden_dim, 1, device)?,
            b2: Var::zeros(1, DType::F32, device)?,
        })
    }
}

impl Predicate for MlpPredicate {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        let x = concat_features(args)?;
        let h = x
            .matmul(self.w1.as_tensor())?
            .broadcast_add(self.b1.as_tensor())?
            .relu()?;
        let logits = h
            .matmul(self.w2.as_tensor())?
            .broadcast_add(self.b2.as_tensor())?;
        Ok(candle_nn::ops::sigmoid(&logits.squeeze(1)?)?)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![self.w1.clone(), self.b1.clone(), self.w2.clone(), self.b2.clone()]
    }
}

/// Similarity of two embeddings mapped into `[0, 1]`: `(1 + cos(a, b)) / 2`.
pub struct CosinePredicate;

impl Predicate for CosinePredicate {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        let [a, b] = args else {
            return Err(FtlError::Usage(format!(
                "cosine predicate takes 2 arguments, got {}",
                args.len()
            )));
        };
        let a = as_features(a)?;
        let b = as_features(b)?;
        let dot = (&a * &b)?.sum(1)?;
        let norms = (a.sqr()?.sum(1)?.sqrt()? * b.sqr()?.sum(1)?.sqrt()?)?;
        let cos = dot.div(&norms.affine(1.0, 1e-8)?)?;
        Ok(cos.affine(0.5, 0.5)?.clamp(0.0, 1.0)?)
    }
}

/// Flat row-major positions of integer-valued arguments in a table of
/// `shape`, or `None` for a nullary table. Every argument must hold whole
/// numbers below its axis extent.
fn row_major_index(args: &[Tensor], shape: &[usize]) -> Result<Option<Tensor>> {
    if args.len() != shape.len() {
        return Err(FtlError::Usage(format!(
            "table has {} axes but got {} arguments",
            shape.len(),
            args.len()
        )));
    }
    let mut index: Option<Tensor> = None;
    let mut stride = 1usize;
    for (position, (arg, &extent)) in args.iter().zip(shape).enumerate().rev() {
        let arg = arg.flatten_all()?.to_dtype(DType::F32)?;
        if !valid_indices(&arg, extent)? {
            return Err(FtlError::Numeric(format!(
                "table argument {} must hold whole numbers in 0..{}",
                position + 1,
                extent
            )));
        }
        let term = arg.affine(stride as f64, 0.0)?;
        index = Some(match index {
            Some(acc) => (acc + term)?,
            None => term,
        });
        stride *= extent;
    }
    Ok(match index {
        Some(index) => Some(index.to_dtype(DType::U32)?),
        None => None,
    })
}

/// NaN fails the whole-number test, infinities the range test.
fn valid_indices(arg: &Tensor, extent: usize) -> Result<bool> {
    if arg.elem_count() == 0 {
        return Ok(true);
    }
    let whole = arg.eq(&arg.floor()?)?;
    let nonnegative = arg.ge(&arg.zeros_like()?)?;
    let below = arg.lt(&arg.ones_like()?.affine(extent as f64, 0.0)?)?;
    let valid = ((whole * nonnegative)? * below)?;
    Ok(valid.min(0)?.to_scalar::<u8>()? == 1)
}

enum TableValues {
    Fixed(Tensor),
    /// Logits; truth degrees are their sigmoid.
    Learned(Var),
}

/// Truth table over integer-valued domain elements, one table axis per
/// argument: `P(i, j) = table[i, j]`.
pub struct TablePredicate {
    shape: Vec<usize>,
    values: TableValues,
}

impl TablePredicate {
    /// A fixed table of truth degrees.
    pub fn fixed(table: Tensor) -> Result<Self> {
        let table = float_table(table)?;
        if table.elem_count() > 0 {
            let flat = table.flatten_all()?.to_dtype(DType::F32)?;
            let lo = flat.min(0)?.to_scalar::<f32>()?;
            let hi = flat.max(0)?.to_scalar::<f32>()?;
            if lo < 0.0 || hi > 1.0 {
                return Err(FtlError::Usage(format!(
                    "truth table values must lie in [0, 1], found range [{}, {}]",
                    lo, hi
                )));
            }
        }
        Ok(Self {
            shape: table.dims().to_vec(),
            values: TableValues::Fixed(table),
        })
    }

    /// A learnable table with small random logits.
    pub fn learnable(shape: &[usize], device: &Device) -> Result<Self> {
        let logits = Tensor::randn(0.0f32, 0.1, shape, device)?;
        Ok(Self {
            shape: shape.to_vec(),
            values: TableValues::Learned(Var::from_tensor(&logits)?),
        })
    }

    /// Current truth degrees, shaped like the table.
    pub fn values(&self) -> Result<Tensor> {
        match &self.values {
            TableValues::Fixed(t) => Ok(t.clone()),
            TableValues::Learned(logits) => Ok(candle_nn::ops::sigmoid(logits.as_tensor())?),
        }
    }
}

impl Predicate for TablePredicate {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        let values = self.values()?;
        match row_major_index(args, &self.shape)? {
            Some(index) => Ok(values.flatten_all()?.index_select(&index, 0)?),
            None => Ok(values),
        }
    }

    fn trainable_vars(&self) -> Vec<Var> {
        match &self.values {
            TableValues::Fixed(_) => Vec::new(),
            TableValues::Learned(logits) => vec![logits.clone()],
        }
    }
}

/// Lookup table from integer-valued arguments to scalar elements:
/// `f(i, j) = table[i, j]`.
pub struct TableFunctor {
    table: Tensor,
}

impl TableFunctor {
    pub fn new(table: Tensor) -> Result<Self> {
        Ok(Self {
            table: float_table(table)?,
        })
    }
}

impl Functor for TableFunctor {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        match row_major_index(args, self.table.dims())? {
            Some(index) => Ok(self.table.flatten_all()?.index_select(&index, 0)?),
            None => Ok(self.table.clone()),
        }
    }
}

/// Integer tables become F32; float tables keep their precision.
fn float_table(table: Tensor) -> Result<Tensor> {
    if table.dtype().is_float() {
        Ok(table)
    } else {
        Ok(table.to_dtype(DType::F32)?)
    }
}

/// Affine map between embedding spaces: `f(x) = x W + b`.
pub struct LinearFunctor {
    w: Var,
    b: Var,
}

impl LinearFunctor {
    pub fn new(input_dim: usize, output_dim: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            w: weight(input_dim, output_dim, device)?,
            b: Var::zeros(output_dim, DType::F32, device)?,
        })
    }
}

impl Functor for LinearFunctor {
    fn forward(&self, args: &[Tensor]) -> Result<Tensor> {
        let x = concat_features(args)?;
        Ok(x.matmul(self.w.as_tensor())?.broadcast_add(self.b.as_tensor())?)
    }

    fn trainable_vars(&self) -> Vec<Var> {
        vec![self.w.clone(), self.b.clone()]
    }
}
