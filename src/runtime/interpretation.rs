//! Evaluation of formulas against a structure.
//!
//! An [`Interpretation`] pairs a [`Structure`] with an [`OperatorSet`] and
//! turns parse trees into tensors of truth degrees. Evaluation is pure: the
//! same formula, assignment and parameters always give the same tensor.

use std::sync::Arc;

use candle_core::{DType, Tensor};
use rustc_hash::FxHashMap;

use super::grounding::{align, expand, flatten_axes, unflatten_axes, Axis, Grounding};
use crate::error::{FtlError, Result};
use crate::fuzzy::OperatorSet;
use crate::structure::Structure;
use crate::syntax::{Formula, Quantifier, Term};

/// Values for the free variables of a formula.
///
/// Every bound tensor is a batch `[B, element dims..]` and all of them must
/// share `B`; row `i` of each tensor together forms one assignment.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    bindings: FxHashMap<String, Tensor>,
}

impl Assignment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`Assignment::insert`].
    pub fn bind(mut self, variable: &str, batch: Tensor) -> Self {
        self.insert(variable, batch);
        self
    }

    pub fn insert(&mut self, variable: &str, batch: Tensor) {
        self.bindings.insert(variable.to_string(), batch);
    }

    pub fn get(&self, variable: &str) -> Option<&Tensor> {
        self.bindings.get(variable)
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// The shared batch size, or `None` for an empty assignment.
    pub fn batch_size(&self) -> Result<Option<usize>> {
        let mut batch = None;
        for (name, t) in &self.bindings {
            if t.rank() == 0 {
                return Err(FtlError::Usage(format!(
                    "assignment for `{}` has no batch axis",
                    name
                )));
            }
            let b = t.dim(0)?;
            match batch {
                Some(known) if known != b => {
                    return Err(FtlError::Usage(format!(
                        "assignment batch sizes disagree: {} vs {} (at `{}`)",
                        known, b, name
                    )))
                }
                _ => batch = Some(b),
            }
        }
        Ok(batch)
    }
}

/// A structure together with the semantics of the logical operators.
#[derive(Debug, Clone)]
pub struct Interpretation {
    structure: Arc<Structure>,
    operators: Arc<OperatorSet>,
}

impl Interpretation {
    pub fn new(structure: Arc<Structure>, operators: Arc<OperatorSet>) -> Self {
        Self {
            structure,
            operators,
        }
    }

    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    pub fn operators(&self) -> &Arc<OperatorSet> {
        &self.operators
    }

    /// Truth degree of `formula`.
    ///
    /// Rank-0 for a closed formula; `[B]` when it has free variables, one
    /// degree per assignment row.
    pub fn evaluate(&self, formula: &Formula, assignment: &Assignment) -> Result<Tensor> {
        let mut eval = Evaluator::new(self, assignment)?;
        let g = eval.formula(formula, 0)?;
        eval.finish(g)
    }

    /// Value of a term: `[B, element dims..]` with free variables, else one
    /// element.
    pub fn evaluate_term(&self, term: &Term, assignment: &Assignment) -> Result<Tensor> {
        let mut eval = Evaluator::new(self, assignment)?;
        let g = eval.term(term)?;
        eval.finish(g)
    }

    /// Scalar satisfaction of a knowledge-base formula: the batch axis, if
    /// any, is reduced with the universal aggregator.
    pub fn evaluate_knowledge_base_term(
        &self,
        formula: &Formula,
        assignment: &Assignment,
    ) -> Result<Tensor> {
        let truth = self.evaluate(formula, assignment)?;
        if truth.rank() == 0 {
            return Ok(truth);
        }
        if truth.dim(0)? == 0 {
            return Ok(Tensor::ones((), truth.dtype(), truth.device())?);
        }
        self.operators.aggregate(Quantifier::Forall, &truth, 0)
    }
}

/// One evaluation pass. Quantified variables live in `env`.
struct Evaluator<'a> {
    interp: &'a Interpretation,
    assignment: &'a Assignment,
    env: FxHashMap<String, Grounding>,
}

impl<'a> Evaluator<'a> {
    fn new(interp: &'a Interpretation, assignment: &'a Assignment) -> Result<Self> {
        assignment.batch_size()?;
        Ok(Self {
            interp,
            assignment,
            env: FxHashMap::default(),
        })
    }

    fn structure(&self) -> &'a Structure {
        &self.interp.structure
    }

    fn operators(&self) -> &'a OperatorSet {
        &self.interp.operators
    }

    /// Drop the axis labels: the result has at most the batch axis left.
    fn finish(&self, g: Grounding) -> Result<Tensor> {
        debug_assert!(g.axes.iter().all(|a| *a == Axis::Batch));
        Ok(g.tensor)
    }

    fn formula(&mut self, formula: &Formula, level: usize) -> Result<Grounding> {
        match formula {
            Formula::Atom { predicate, args } => {
                let args = args
                    .iter()
                    .map(|t| self.term(t))
                    .collect::<Result<Vec<_>>>()?;
                self.apply(&args, |rows| self.structure().evaluate_predicate(predicate, rows))
            }
            Formula::Not(inner) => {
                let g = self.formula(inner, level)?;
                Ok(Grounding {
                    tensor: self.operators().negate(&g.tensor)?,
                    axes: g.axes,
                })
            }
            Formula::Binary { op, lhs, rhs } => {
                let l = self.formula(lhs, level)?;
                let r = self.formula(rhs, level)?;
                let (axes, _, tensors) = align(&[&l, &r])?;
                let tensor = self.operators().connective(*op, &tensors[0], &tensors[1])?;
                Ok(Grounding { tensor, axes })
            }
            Formula::Quantified {
                quantifier,
                variable,
                sort,
                body,
            } => {
                let domain = self.structure().domain(sort)?;
                let n = if domain.rank() == 0 { 0 } else { domain.dim(0)? };
                if n == 0 {
                    let dtype = match domain.dtype() {
                        dtype if dtype.is_float() => dtype,
                        _ => self.structure().truth_dtype(),
                    };
                    return self.vacuous(*quantifier, variable, body, dtype);
                }

                let axis = Axis::Bound(level);
                let shadowed = self
                    .env
                    .insert(variable.clone(), Grounding::new(domain, axis));
                let result = self.formula(body, level + 1);
                match shadowed {
                    Some(outer) => self.env.insert(variable.clone(), outer),
                    None => self.env.remove(variable),
                };
                let mut g = result?;

                // A body that ignores the variable still ranges over the domain.
                // Its own axis is the innermost, so it goes last.
                if g.position(axis).is_none() {
                    let mut axes = g.axes.clone();
                    axes.push(axis);
                    let mut sizes = g.axis_sizes()?;
                    sizes.push(n);
                    g = Grounding {
                        tensor: expand(&g, &axes, &sizes)?,
                        axes,
                    };
                }

                let dim = g.axes.len() - 1;
                let tensor = self.operators().aggregate(*quantifier, &g.tensor, dim)?;
                let mut axes = g.axes;
                axes.truncate(dim);
                Ok(Grounding { tensor, axes })
            }
        }
    }

    /// Quantification over an empty domain: the aggregator identity, shaped
    /// by the axes the body would have had besides the quantified one.
    fn vacuous(
        &self,
        quantifier: Quantifier,
        variable: &str,
        body: &Formula,
        dtype: DType,
    ) -> Result<Grounding> {
        let mut joint: Vec<(Axis, usize)> = Vec::new();
        for (name, _) in body.free_variables() {
            if name == variable {
                continue;
            }
            let (axis, size) = match self.env.get(&name) {
                Some(g) => (g.axes[0], g.tensor.dim(0)?),
                None => (Axis::Batch, self.free_batch(&name)?.dim(0)?),
            };
            if !joint.iter().any(|(a, _)| *a == axis) {
                joint.push((axis, size));
            }
        }
        joint.sort_by_key(|(axis, _)| *axis);
        let (axes, sizes): (Vec<Axis>, Vec<usize>) = joint.into_iter().unzip();

        let device = self.structure().device();
        let tensor = Tensor::ones(sizes, dtype, device)?
            .affine(OperatorSet::identity(quantifier), 0.0)?;
        Ok(Grounding { tensor, axes })
    }

    fn free_batch(&self, name: &str) -> Result<&'a Tensor> {
        self.assignment
            .get(name)
            .ok_or_else(|| FtlError::Usage(format!("free variable `{}` is not assigned", name)))
    }

    fn term(&mut self, term: &Term) -> Result<Grounding> {
        match term {
            Term::Variable { name, .. } => {
                if let Some(g) = self.env.get(name) {
                    return Ok(g.clone());
                }
                let batch = self.free_batch(name)?;
                Ok(Grounding::new(batch.clone(), Axis::Batch))
            }
            Term::Constant { name, .. } => {
                Ok(Grounding::constant(self.structure().constant(name)?))
            }
            Term::Apply { functor, args, .. } => {
                let args = args
                    .iter()
                    .map(|t| self.term(t))
                    .collect::<Result<Vec<_>>>()?;
                self.apply(&args, |rows| self.structure().evaluate_functor(functor, rows))
            }
        }
    }

    /// Call a symbol on aligned arguments: flatten the joint axes into one
    /// row axis, evaluate, and restore the axes on the result.
    fn apply<F>(&self, args: &[Grounding], call: F) -> Result<Grounding>
    where
        F: Fn(&[Tensor]) -> Result<Tensor>,
    {
        if args.is_empty() {
            return Ok(Grounding::constant(call(&[])?));
        }
        let refs: Vec<&Grounding> = args.iter().collect();
        let (axes, sizes, tensors) = align(&refs)?;
        let rows = tensors
            .iter()
            .map(|t| flatten_axes(t, &sizes))
            .collect::<Result<Vec<_>>>()?;
        let out = call(&rows)?;
        Ok(Grounding {
            tensor: unflatten_axes(&out, &sizes)?,
            axes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Signature;
    use crate::structure::{embedding, FnFunctor, FnPredicate, TablePredicate};
    use crate::syntax::parse;
    use candle_core::Device;

    fn signature() -> Arc<Signature> {
        Arc::new(
            Signature::builder()
                .sort("D")
                .sort("E")
                .predicate("P", &["D"])
                .predicate("R", &["D", "D"])
                .predicate("Q", &["E"])
                .predicate("Rain", &[])
                .functor("succ", &["D"], "D")
                .constant("one", "D")
                .build()
                .unwrap(),
        )
    }

    /// D = {0, 1, 2}, P(x) = [x == 1], R(x, y) = [x < y], E empty.
    fn structure() -> Arc<Structure> {
        let dev = Device::Cpu;
        let mut s = Structure::new(signature(), &dev);
        s.set_domain("D", embedding::index_domain(3, &dev).unwrap()).unwrap();
        s.set_domain("E", embedding::index_domain(0, &dev).unwrap()).unwrap();
        s.set_predicate("P", TablePredicate::fixed(Tensor::new(&[0.0f32, 1.0, 0.0], &dev).unwrap()).unwrap())
            .unwrap();
        let lt = Tensor::new(&[[0.0f32, 1.0, 1.0], [0.0, 0.0, 1.0], [0.0, 0.0, 0.0]], &dev).unwrap();
        s.set_predicate("R", TablePredicate::fixed(lt).unwrap()).unwrap();
        s.set_predicate("Q", FnPredicate::new(|args| Ok(args[0].ones_like()?))).unwrap();
        s.set_predicate("Rain", FnPredicate::new(|_| Ok(Tensor::new(0.25f32, &Device::Cpu)?)))
            .unwrap();
        // succ(x) = min(x + 1, 2)
        s.set_functor("succ", FnFunctor::new(|args| Ok(args[0].affine(1.0, 1.0)?.minimum(2.0)?)))
            .unwrap();
        s.set_constant("one", Tensor::new(1.0f32, &dev).unwrap()).unwrap();
        Arc::new(s)
    }

    fn interp(ops: OperatorSet) -> Interpretation {
        Interpretation::new(structure(), Arc::new(ops))
    }

    fn scalar(i: &Interpretation, text: &str) -> f32 {
        let f = parse(text, i.structure().signature()).unwrap();
        i.evaluate(&f, &Assignment::new()).unwrap().to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_exact_quantifiers_over_indicator() {
        for ops in [OperatorSet::product(), OperatorSet::godel()] {
            let i = interp(ops);
            assert_eq!(scalar(&i, "exists x. P(x)"), 1.0);
            assert_eq!(scalar(&i, "forall x. P(x)"), 0.0);
        }
    }

    #[test]
    fn test_nested_quantifiers() {
        let i = interp(OperatorSet::godel());
        // every x has a strictly larger y: false for x = 2
        assert_eq!(scalar(&i, "forall x. exists y. R(x, y)"), 0.0);
        // 0 has no smaller element
        assert_eq!(scalar(&i, "exists x. forall y. !R(y, x)"), 1.0);
        assert_eq!(scalar(&i, "exists x. exists y. R(x, y) & P(y)"), 1.0);
    }

    #[test]
    fn test_constants_and_functors() {
        let i = interp(OperatorSet::godel());
        assert_eq!(scalar(&i, "P(one)"), 1.0);
        assert_eq!(scalar(&i, "P(succ(one))"), 0.0);
        assert_eq!(scalar(&i, "exists x. P(succ(x))"), 1.0);
        assert_eq!(scalar(&i, "forall x. R(x, succ(x)) | P(succ(succ(x))) | !P(x)"), 1.0);
    }

    #[test]
    fn test_vacuous_quantification() {
        let i = interp(OperatorSet::standard_product());
        assert_eq!(scalar(&i, "forall e: E. Q(e)"), 1.0);
        assert_eq!(scalar(&i, "exists e: E. Q(e)"), 0.0);

        // the identity keeps the free variable's batch axis
        let f = parse("exists e: E. Q(e) & P(x)", i.structure().signature()).unwrap();
        let a = Assignment::new().bind("x", Tensor::new(&[0.0f32, 1.0], &Device::Cpu).unwrap());
        assert_eq!(i.evaluate(&f, &a).unwrap().to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_vacuous_quantification_keeps_f64() {
        let dev = Device::Cpu;
        let mut s = Structure::new(signature(), &dev);
        s.set_domain("D", Tensor::new(&[0.2f64, 0.5, 1.0], &dev).unwrap()).unwrap();
        s.set_domain("E", Tensor::from_vec(Vec::<f64>::new(), 0, &dev).unwrap()).unwrap();
        s.set_predicate("P", FnPredicate::new(|args| Ok(args[0].clone()))).unwrap();
        s.set_predicate("Q", FnPredicate::new(|args| Ok(args[0].zeros_like()?))).unwrap();
        let i = Interpretation::new(Arc::new(s), Arc::new(OperatorSet::product()));

        let f = parse("forall x. P(x) & (forall e: E. Q(e))", i.structure().signature()).unwrap();
        let t = i.evaluate(&f, &Assignment::new()).unwrap();
        assert_eq!(t.dtype(), DType::F64);
        assert!((t.to_scalar::<f64>().unwrap() - 0.1).abs() < 1e-12);

        let f = parse("exists e: E. Q(e)", i.structure().signature()).unwrap();
        let t = i.evaluate(&f, &Assignment::new()).unwrap();
        assert_eq!(t.to_scalar::<f64>().unwrap(), 0.0);
    }

    #[test]
    fn test_unused_variable_ranges_over_domain() {
        let i = interp(OperatorSet::product());
        // Rain^3 under the product fold
        assert!((scalar(&i, "forall x: D. Rain") - 0.25f32.powi(3)).abs() < 1e-6);
    }

    #[test]
    fn test_free_variables_zip_rows() {
        let i = interp(OperatorSet::godel());
        let f = parse("R(x, y)", i.structure().signature()).unwrap();
        let dev = Device::Cpu;
        let a = Assignment::new()
            .bind("x", Tensor::new(&[0.0f32, 1.0, 2.0], &dev).unwrap())
            .bind("y", Tensor::new(&[1.0f32, 0.0, 2.0], &dev).unwrap());
        assert_eq!(i.evaluate(&f, &a).unwrap().to_vec1::<f32>().unwrap(), vec![1.0, 0.0, 0.0]);

        let kb = i.evaluate_knowledge_base_term(&f, &a).unwrap();
        assert_eq!(kb.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_free_and_bound_mix() {
        let i = interp(OperatorSet::godel());
        let f = parse("exists y. R(x, y)", i.structure().signature()).unwrap();
        let a = Assignment::new().bind("x", Tensor::new(&[0.0f32, 2.0], &Device::Cpu).unwrap());
        assert_eq!(i.evaluate(&f, &a).unwrap().to_vec1::<f32>().unwrap(), vec![1.0, 0.0]);
    }

    #[test]
    fn test_assignment_errors() {
        let i = interp(OperatorSet::godel());
        let f = parse("R(x, y)", i.structure().signature()).unwrap();
        let dev = Device::Cpu;
        let missing = Assignment::new().bind("x", Tensor::new(&[0.0f32], &dev).unwrap());
        assert!(matches!(i.evaluate(&f, &missing), Err(FtlError::Usage(_))));

        let ragged = Assignment::new()
            .bind("x", Tensor::new(&[0.0f32], &dev).unwrap())
            .bind("y", Tensor::new(&[0.0f32, 1.0], &dev).unwrap());
        assert!(matches!(i.evaluate(&f, &ragged), Err(FtlError::Usage(_))));
    }

    #[test]
    fn test_double_negation_and_idempotence() {
        let i = interp(OperatorSet::standard_product());
        let once = scalar(&i, "exists x. P(x) & Rain");
        let twice = scalar(&i, "!!(exists x. P(x) & Rain)");
        assert!((once - twice).abs() < 1e-6);
        assert_eq!(once, scalar(&i, "exists x. P(x) & Rain"));
    }

    #[test]
    fn test_truth_degrees_stay_in_unit_interval() {
        let sets = [
            OperatorSet::standard_product(),
            OperatorSet::product(),
            OperatorSet::godel(),
            OperatorSet::lukasiewicz(),
        ];
        let formulas = [
            "forall x. exists y. R(x, y) <-> P(y)",
            "exists x. P(x) -> Rain | !P(succ(x))",
            "forall x. forall y. R(x, y) -> !R(y, x)",
        ];
        for ops in sets {
            let i = interp(ops);
            for text in formulas {
                let v = scalar(&i, text);
                assert!((0.0..=1.0).contains(&v), "{} gave {}", text, v);
            }
        }
    }

    #[test]
    fn test_evaluate_term() {
        let i = interp(OperatorSet::godel());
        let sig = i.structure().signature().clone();
        let t = crate::syntax::parse_term("succ(succ(one))", &sig, None).unwrap();
        assert_eq!(i.evaluate_term(&t, &Assignment::new()).unwrap().to_scalar::<f32>().unwrap(), 2.0);
    }
}
