//! Differentiable fuzzy logic operators.
//!
//! Every operator is a pure elementwise function over tensors of truth
//! degrees in `[0, 1]`. Binary operators broadcast their operands.
//!
//! | Family      | t-norm T(a,b)              | t-conorm S(a,b)           |
//! |-------------|----------------------------|---------------------------|
//! | Gödel       | min(a,b)                   | max(a,b)                  |
//! | Product     | a·b                        | a + b − a·b               |
//! | Łukasiewicz | max(a + b − 1, 0)          | min(a + b, 1)             |
//! | Drastic     | min(a,b) if a=1 or b=1, else 0 | max(a,b) if a=0 or b=0, else 1 |
//! | Nilpotent   | 0 if a + b ≤ 1, else min   | 1 if a + b ≥ 1, else max  |
//!
//! Aggregators reduce one axis of a tensor and are used for quantifiers.

use candle_core::Tensor;

use crate::error::Result;

/// Guards the Goguen implication's division; the masked branch never uses it.
const DIV_FLOOR: f64 = 1e-12;

/// Strong negation: N(a) = 1 − a
pub fn negation(a: &Tensor) -> Result<Tensor> {
    Ok(a.affine(-1.0, 1.0)?)
}

// =============================================================================
// T-NORMS
// =============================================================================

pub fn tnorm_godel(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.broadcast_minimum(b)?)
}

/// Product t-norm: T(a, b) = a·b
///
/// Gradients are non-zero wherever the other operand is, unlike min.
pub fn tnorm_product(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.broadcast_mul(b)?)
}

pub fn tnorm_lukasiewicz(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.broadcast_add(b)?.affine(1.0, -1.0)?.maximum(0.0)?)
}

pub fn tnorm_drastic(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let m = a.broadcast_minimum(b)?;
    let mask = a
        .eq(1.0)?
        .broadcast_maximum(&b.eq(1.0)?)?;
    Ok(mask.where_cond(&m, &m.zeros_like()?)?)
}

pub fn tnorm_nilpotent_minimum(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let m = a.broadcast_minimum(b)?;
    let mask = a.broadcast_add(b)?.le(1.0)?;
    Ok(mask.where_cond(&m.zeros_like()?, &m)?)
}

// =============================================================================
// T-CONORMS
// =============================================================================

pub fn tconorm_godel(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.broadcast_maximum(b)?)
}

/// Probabilistic sum: S(a, b) = a + b − a·b, the De Morgan dual of the product t-norm.
pub fn tconorm_product(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let sum = a.broadcast_add(b)?;
    let product = a.broadcast_mul(b)?;
    Ok((sum - product)?)
}

pub fn tconorm_lukasiewicz(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    Ok(a.broadcast_add(b)?.minimum(1.0)?)
}

pub fn tconorm_drastic(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let m = a.broadcast_maximum(b)?;
    let mask = a
        .eq(0.0)?
        .broadcast_maximum(&b.eq(0.0)?)?;
    Ok(mask.where_cond(&m, &m.ones_like()?)?)
}

pub fn tconorm_nilpotent_maximum(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    let m = a.broadcast_maximum(b)?;
    let mask = a.broadcast_add(b)?.ge(1.0)?;
    Ok(mask.where_cond(&m.ones_like()?, &m)?)
}

/// Build the dual t-conorm S(a, b) = N(T(N(a), N(b))) of any t-norm.
pub fn dual_tconorm<F>(tnorm: F) -> impl Fn(&Tensor, &Tensor) -> Result<Tensor>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    move |a: &Tensor, b: &Tensor| negation(&tnorm(&negation(a)?, &negation(b)?)?)
}

// =============================================================================
// IMPLICATIONS
// =============================================================================

/// S-implication of a t-conorm: I(a, c) = S(N(a), c).
///
/// With the probabilistic sum this is the Reichenbach implication `1 − a + a·c`.
pub fn s_implication<F>(tconorm: F) -> impl Fn(&Tensor, &Tensor) -> Result<Tensor>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    move |a: &Tensor, c: &Tensor| tconorm(&negation(a)?, c)
}

// R-implications have no cheap generic construction from a t-norm, so each
// family's residuum is written out.

/// Gödel residuum: 1 if a ≤ c, else c.
pub fn r_implication_godel(a: &Tensor, c: &Tensor) -> Result<Tensor> {
    let (a, c) = broadcast_pair(a, c)?;
    let mask = a.le(&c)?;
    Ok(mask.where_cond(&c.ones_like()?, &c)?)
}

/// Goguen residuum: 1 if a ≤ c, else c / a.
pub fn r_implication_product(a: &Tensor, c: &Tensor) -> Result<Tensor> {
    let (a, c) = broadcast_pair(a, c)?;
    let mask = a.le(&c)?;
    let ratio = c.div(&a.maximum(DIV_FLOOR)?)?;
    Ok(mask.where_cond(&c.ones_like()?, &ratio)?)
}

/// Łukasiewicz residuum: min(1 − a + c, 1).
pub fn r_implication_lukasiewicz(a: &Tensor, c: &Tensor) -> Result<Tensor> {
    Ok(negation(a)?.broadcast_add(c)?.minimum(1.0)?)
}

/// Drastic residuum: 1 if a < 1, else c.
pub fn r_implication_drastic(a: &Tensor, c: &Tensor) -> Result<Tensor> {
    let (a, c) = broadcast_pair(a, c)?;
    let mask = a.lt(1.0)?;
    Ok(mask.where_cond(&c.ones_like()?, &c)?)
}

/// Fodor (nilpotent) residuum: 1 if a ≤ c, else max(1 − a, c).
pub fn r_implication_nilpotent(a: &Tensor, c: &Tensor) -> Result<Tensor> {
    let (a, c) = broadcast_pair(a, c)?;
    let mask = a.le(&c)?;
    let fallback = negation(&a)?.maximum(&c)?;
    Ok(mask.where_cond(&c.ones_like()?, &fallback)?)
}

fn broadcast_pair(a: &Tensor, b: &Tensor) -> Result<(Tensor, Tensor)> {
    if a.shape() == b.shape() {
        return Ok((a.clone(), b.clone()));
    }
    let shape = a.shape().broadcast_shape_binary_op(b.shape(), "broadcast_pair")?;
    Ok((a.broadcast_as(&shape)?, b.broadcast_as(&shape)?))
}

// =============================================================================
// AGGREGATORS
// =============================================================================

/// Reduce `dim` by folding a binary operator from `identity`.
///
/// Folding the product t-norm is exact universal quantification over the
/// product semantics; folding the probabilistic sum is its existential dual.
pub fn fold<F>(t: &Tensor, dim: usize, identity: f64, op: F) -> Result<Tensor>
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor>,
{
    let mut shape = t.dims().to_vec();
    let n = shape.remove(dim);
    let mut acc = Tensor::ones(shape, t.dtype(), t.device())?.affine(identity, 0.0)?;
    for i in 0..n {
        let slice = t.narrow(dim, i, 1)?.squeeze(dim)?;
        acc = op(&acc, &slice)?;
    }
    Ok(acc)
}

pub fn minimum(t: &Tensor, dim: usize) -> Result<Tensor> {
    Ok(t.min(dim)?)
}

pub fn maximum(t: &Tensor, dim: usize) -> Result<Tensor> {
    Ok(t.max(dim)?)
}

/// Generalised mean: pM(t) = (mean tᵖ)^(1/p).
///
/// Approaches max as p grows; p = 1 is the arithmetic mean.
pub fn generalized_mean(t: &Tensor, dim: usize, p: f64) -> Result<Tensor> {
    Ok(t.powf(p)?.mean(dim)?.powf(1.0 / p)?)
}

/// Generalised mean error: pME(t) = 1 − (mean (1 − t)ᵖ)^(1/p).
///
/// Approaches min as p grows. Its gradient is undefined where every input is
/// exactly 1, which is what input projection guards against.
pub fn generalized_mean_error(t: &Tensor, dim: usize, p: f64) -> Result<Tensor> {
    let err = negation(t)?.powf(p)?.mean(dim)?.powf(1.0 / p)?;
    negation(&err)
}

// =============================================================================
// PROJECTIONS
// =============================================================================

/// Map [0,1] into [ε, 1].
pub fn project_up(t: &Tensor, epsilon: f64) -> Result<Tensor> {
    Ok(t.affine(1.0 - epsilon, epsilon)?)
}

/// Map [0,1] into [0, 1 − ε].
pub fn project_down(t: &Tensor, epsilon: f64) -> Result<Tensor> {
    Ok(t.affine(1.0 - epsilon, 0.0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn t(v: &[f32]) -> Tensor {
        Tensor::new(v, &Device::Cpu).unwrap()
    }

    fn vals(t: &Tensor) -> Vec<f32> {
        t.flatten_all().unwrap().to_vec1::<f32>().unwrap()
    }

    fn assert_close(got: &[f32], want: &[f32]) {
        assert_eq!(got.len(), want.len());
        for (g, w) in got.iter().zip(want) {
            assert!((g - w).abs() < 1e-5, "got {:?}, want {:?}", got, want);
        }
    }

    #[test]
    fn test_tnorms() {
        let a = t(&[0.2, 0.7, 1.0, 0.6]);
        let b = t(&[0.5, 0.9, 0.4, 0.3]);
        assert_close(&vals(&tnorm_godel(&a, &b).unwrap()), &[0.2, 0.7, 0.4, 0.3]);
        assert_close(&vals(&tnorm_product(&a, &b).unwrap()), &[0.1, 0.63, 0.4, 0.18]);
        assert_close(&vals(&tnorm_lukasiewicz(&a, &b).unwrap()), &[0.0, 0.6, 0.4, 0.0]);
        assert_close(&vals(&tnorm_drastic(&a, &b).unwrap()), &[0.0, 0.0, 0.4, 0.0]);
        assert_close(&vals(&tnorm_nilpotent_minimum(&a, &b).unwrap()), &[0.0, 0.7, 0.4, 0.0]);
    }

    #[test]
    fn test_tconorms() {
        let a = t(&[0.2, 0.7, 0.0, 0.6]);
        let b = t(&[0.5, 0.9, 0.4, 0.3]);
        assert_close(&vals(&tconorm_godel(&a, &b).unwrap()), &[0.5, 0.9, 0.4, 0.6]);
        assert_close(&vals(&tconorm_product(&a, &b).unwrap()), &[0.6, 0.97, 0.4, 0.72]);
        assert_close(&vals(&tconorm_lukasiewicz(&a, &b).unwrap()), &[0.7, 1.0, 0.4, 0.9]);
        assert_close(&vals(&tconorm_drastic(&a, &b).unwrap()), &[1.0, 1.0, 0.4, 1.0]);
        assert_close(&vals(&tconorm_nilpotent_maximum(&a, &b).unwrap()), &[0.5, 1.0, 0.4, 0.6]);
    }

    #[test]
    fn test_dual_tconorm_matches_probabilistic_sum() {
        let a = t(&[0.1, 0.5, 0.9]);
        let b = t(&[0.3, 0.5, 0.2]);
        let dual = dual_tconorm(tnorm_product);
        assert_close(
            &vals(&dual(&a, &b).unwrap()),
            &vals(&tconorm_product(&a, &b).unwrap()),
        );
    }

    #[test]
    fn test_de_morgan_product_pair() {
        let a = t(&[0.0, 0.13, 0.5, 0.77, 1.0]);
        let b = t(&[0.9, 0.41, 0.5, 0.08, 1.0]);
        let lhs = negation(&tnorm_product(&a, &b).unwrap()).unwrap();
        let rhs = tconorm_product(&negation(&a).unwrap(), &negation(&b).unwrap()).unwrap();
        assert_close(&vals(&lhs), &vals(&rhs));
    }

    #[test]
    fn test_double_negation() {
        let a = t(&[0.0, 0.25, 0.6, 1.0]);
        let back = negation(&negation(&a).unwrap()).unwrap();
        assert_close(&vals(&back), &vals(&a));
    }

    #[test]
    fn test_implications() {
        let a = t(&[0.0, 0.8, 0.4, 1.0]);
        let c = t(&[0.3, 0.4, 0.6, 0.2]);
        let reichenbach = s_implication(tconorm_product);
        assert_close(&vals(&reichenbach(&a, &c).unwrap()), &[1.0, 0.52, 0.84, 0.2]);
        assert_close(&vals(&r_implication_godel(&a, &c).unwrap()), &[1.0, 0.4, 1.0, 0.2]);
        assert_close(&vals(&r_implication_product(&a, &c).unwrap()), &[1.0, 0.5, 1.0, 0.2]);
        assert_close(&vals(&r_implication_lukasiewicz(&a, &c).unwrap()), &[1.0, 0.6, 1.0, 0.2]);
        assert_close(&vals(&r_implication_drastic(&a, &c).unwrap()), &[1.0, 1.0, 1.0, 0.2]);
        assert_close(&vals(&r_implication_nilpotent(&a, &c).unwrap()), &[1.0, 0.4, 1.0, 0.2]);
    }

    #[test]
    fn test_aggregators() {
        let x = Tensor::new(&[[0.0f32, 1.0, 0.0], [1.0, 1.0, 0.5]], &Device::Cpu).unwrap();
        assert_close(&vals(&minimum(&x, 1).unwrap()), &[0.0, 0.5]);
        assert_close(&vals(&maximum(&x, 1).unwrap()), &[1.0, 1.0]);
        assert_close(&vals(&fold(&x, 1, 1.0, tnorm_product).unwrap()), &[0.0, 0.5]);
        assert_close(&vals(&fold(&x, 1, 0.0, tconorm_product).unwrap()), &[1.0, 1.0]);
        assert_close(&vals(&generalized_mean(&x, 1, 1.0).unwrap()), &[1.0 / 3.0, 2.5 / 3.0]);

        let pme = vals(&generalized_mean_error(&x, 1, 2.0).unwrap());
        assert!((pme[0] - (1.0 - (2.0f32 / 3.0).sqrt())).abs() < 1e-5);
        assert!((pme[1] - (1.0 - (0.25f32 / 3.0).sqrt())).abs() < 1e-5);
    }

    #[test]
    fn test_projection_bounds() {
        let x = t(&[0.0, 1.0]);
        assert_close(&vals(&project_up(&x, 0.01).unwrap()), &[0.01, 1.0]);
        assert_close(&vals(&project_down(&x, 0.01).unwrap()), &[0.0, 0.99]);
    }
}
