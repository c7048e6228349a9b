//! Operator sets: the semantics chosen for each connective and quantifier.
//!
//! An [`OperatorSet`] maps every [`Connective`] and [`Quantifier`] to a tensor
//! function. Sets are immutable once built and shared as `Arc<OperatorSet>`.

use std::fmt;
use std::sync::Arc;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use super::ops;
use crate::error::{FtlError, Result};
use crate::syntax::{Connective, Quantifier};

pub type UnaryOp = Arc<dyn Fn(&Tensor) -> Result<Tensor> + Send + Sync>;
pub type BinaryOp = Arc<dyn Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync>;
/// Reduces one axis of a tensor of truth degrees.
pub type Aggregator = Arc<dyn Fn(&Tensor, usize) -> Result<Tensor> + Send + Sync>;

fn unary<F>(f: F) -> UnaryOp
where
    F: Fn(&Tensor) -> Result<Tensor> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn binary<F>(f: F) -> BinaryOp
where
    F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn reduce<F>(f: F) -> Aggregator
where
    F: Fn(&Tensor, usize) -> Result<Tensor> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// T-norm family; fixes the t-norm and its dual t-conorm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TNormFamily {
    Godel,
    #[default]
    Product,
    Lukasiewicz,
    Drastic,
    Nilpotent,
}

/// How implication is derived from the family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplicationKind {
    /// `S(N(a), c)`
    #[default]
    S,
    /// Residuum of the t-norm
    R,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregatorKind {
    /// min for forall, max for exists
    Extremum,
    /// Fold of the family t-norm (forall) or t-conorm (exists)
    Fold,
    GeneralizedMean { p: f64 },
    GeneralizedMeanError { p: f64 },
}

/// Serializable description of an operator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub family: TNormFamily,
    pub implication: ImplicationKind,
    pub universal: AggregatorKind,
    pub existential: AggregatorKind,
    /// Input projection; 0 disables it.
    pub projection_epsilon: f64,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            family: TNormFamily::Product,
            implication: ImplicationKind::S,
            universal: AggregatorKind::GeneralizedMeanError { p: 2.0 },
            existential: AggregatorKind::GeneralizedMean { p: 1.0 },
            projection_epsilon: 0.001,
        }
    }
}

/// Connective and quantifier semantics.
#[derive(Clone)]
pub struct OperatorSet {
    name: String,
    negation: UnaryOp,
    tnorm: BinaryOp,
    tconorm: BinaryOp,
    implication: BinaryOp,
    equivalence: BinaryOp,
    universal: Aggregator,
    existential: Aggregator,
}

impl fmt::Debug for OperatorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorSet").field("name", &self.name).finish()
    }
}

impl OperatorSet {
    pub fn builder(name: &str) -> OperatorSetBuilder {
        OperatorSetBuilder {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn negate(&self, a: &Tensor) -> Result<Tensor> {
        (self.negation)(a)
    }

    pub fn connective(&self, op: Connective, a: &Tensor, b: &Tensor) -> Result<Tensor> {
        match op {
            Connective::And => (self.tnorm)(a, b),
            Connective::Or => (self.tconorm)(a, b),
            Connective::Implies => (self.implication)(a, b),
            Connective::Iff => (self.equivalence)(a, b),
        }
    }

    /// Reduce axis `dim` with the quantifier's aggregator.
    pub fn aggregate(&self, quantifier: Quantifier, t: &Tensor, dim: usize) -> Result<Tensor> {
        match quantifier {
            Quantifier::Forall => (self.universal)(t, dim),
            Quantifier::Exists => (self.existential)(t, dim),
        }
    }

    /// Value of a quantifier over an empty domain.
    pub fn identity(quantifier: Quantifier) -> f64 {
        match quantifier {
            Quantifier::Forall => 1.0,
            Quantifier::Exists => 0.0,
        }
    }

    /// Product t-norm, probabilistic sum, Reichenbach implication,
    /// pME(p=2) for forall, pM(p=1) for exists, projection epsilon 0.001.
    ///
    /// The smooth aggregators and projection keep gradients informative,
    /// which makes this the default for training.
    pub fn standard_product() -> Self {
        Self::from_config_named("standard_product", &OperatorConfig::default())
    }

    /// Product connectives with exact fold quantifiers and no projection.
    pub fn product() -> Self {
        Self::from_config_named(
            "product",
            &OperatorConfig {
                family: TNormFamily::Product,
                implication: ImplicationKind::S,
                universal: AggregatorKind::Fold,
                existential: AggregatorKind::Fold,
                projection_epsilon: 0.0,
            },
        )
    }

    /// min / max with the Gödel residuum.
    pub fn godel() -> Self {
        Self::from_config_named(
            "godel",
            &OperatorConfig {
                family: TNormFamily::Godel,
                implication: ImplicationKind::R,
                universal: AggregatorKind::Extremum,
                existential: AggregatorKind::Extremum,
                projection_epsilon: 0.0,
            },
        )
    }

    pub fn lukasiewicz() -> Self {
        Self::from_config_named(
            "lukasiewicz",
            &OperatorConfig {
                family: TNormFamily::Lukasiewicz,
                implication: ImplicationKind::R,
                universal: AggregatorKind::Fold,
                existential: AggregatorKind::Fold,
                projection_epsilon: 0.0,
            },
        )
    }

    /// Build a set from its serialized description.
    pub fn from_config(config: &OperatorConfig) -> Result<Self> {
        validate(config)?;
        Ok(Self::from_config_named("custom", config))
    }

    fn from_config_named(name: &str, config: &OperatorConfig) -> Self {
        let (tnorm, tconorm, residuum) = match config.family {
            TNormFamily::Godel => (
                binary(ops::tnorm_godel),
                binary(ops::tconorm_godel),
                binary(ops::r_implication_godel),
            ),
            TNormFamily::Product => (
                binary(ops::tnorm_product),
                binary(ops::tconorm_product),
                binary(ops::r_implication_product),
            ),
            TNormFamily::Lukasiewicz => (
                binary(ops::tnorm_lukasiewicz),
                binary(ops::tconorm_lukasiewicz),
                binary(ops::r_implication_lukasiewicz),
            ),
            TNormFamily::Drastic => (
                binary(ops::tnorm_drastic),
                binary(ops::tconorm_drastic),
                binary(ops::r_implication_drastic),
            ),
            TNormFamily::Nilpotent => (
                binary(ops::tnorm_nilpotent_minimum),
                binary(ops::tconorm_nilpotent_maximum),
                binary(ops::r_implication_nilpotent),
            ),
        };

        let implication = match config.implication {
            ImplicationKind::S => {
                let s = tconorm.clone();
                binary(move |a, c| s(&ops::negation(a)?, c))
            }
            ImplicationKind::R => residuum,
        };

        let universal = aggregator(config.universal, Quantifier::Forall, &tnorm, &tconorm);
        let existential = aggregator(config.existential, Quantifier::Exists, &tnorm, &tconorm);

        let builder = OperatorSet::builder(name)
            .negation(ops::negation)
            .tnorm_op(tnorm)
            .tconorm_op(tconorm)
            .implication_op(implication)
            .universal_op(universal)
            .existential_op(existential)
            .projection(config.projection_epsilon);
        builder.assemble()
    }
}

fn validate(config: &OperatorConfig) -> Result<()> {
    if !(0.0..1.0).contains(&config.projection_epsilon) {
        return Err(FtlError::Config(format!(
            "projection epsilon must lie in [0, 1), got {}",
            config.projection_epsilon
        )));
    }
    for kind in [config.universal, config.existential] {
        if let AggregatorKind::GeneralizedMean { p } | AggregatorKind::GeneralizedMeanError { p } =
            kind
        {
            if !(p.is_finite() && p >= 1.0) {
                return Err(FtlError::Config(format!(
                    "generalized mean exponent must be finite and >= 1, got {}",
                    p
                )));
            }
        }
    }
    Ok(())
}

fn aggregator(
    kind: AggregatorKind,
    quantifier: Quantifier,
    tnorm: &BinaryOp,
    tconorm: &BinaryOp,
) -> Aggregator {
    match (kind, quantifier) {
        (AggregatorKind::Extremum, Quantifier::Forall) => reduce(ops::minimum),
        (AggregatorKind::Extremum, Quantifier::Exists) => reduce(ops::maximum),
        (AggregatorKind::Fold, _) => {
            let op = match quantifier {
                Quantifier::Forall => tnorm.clone(),
                Quantifier::Exists => tconorm.clone(),
            };
            let identity = OperatorSet::identity(quantifier);
            reduce(move |t, dim| ops::fold(t, dim, identity, |a, b| op(a, b)))
        }
        (AggregatorKind::GeneralizedMean { p }, _) => {
            reduce(move |t, dim| ops::generalized_mean(t, dim, p))
        }
        (AggregatorKind::GeneralizedMeanError { p }, _) => {
            reduce(move |t, dim| ops::generalized_mean_error(t, dim, p))
        }
    }
}

/// Assembles an [`OperatorSet`] from arbitrary closures.
///
/// Equivalence defaults to `T(I(a, b), I(b, a))`. With a non-zero projection
/// epsilon, t-norm inputs, implication antecedents and existential inputs are
/// lifted into `[ε, 1]`; t-conorm inputs, implication consequents and
/// universal inputs are lowered into `[0, 1 − ε]`.
#[derive(Default)]
pub struct OperatorSetBuilder {
    name: String,
    negation: Option<UnaryOp>,
    tnorm: Option<BinaryOp>,
    tconorm: Option<BinaryOp>,
    implication: Option<BinaryOp>,
    equivalence: Option<BinaryOp>,
    universal: Option<Aggregator>,
    existential: Option<Aggregator>,
    epsilon: f64,
}

impl OperatorSetBuilder {
    pub fn negation<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.negation = Some(unary(f));
        self
    }

    pub fn tnorm<F>(self, f: F) -> Self
    where
        F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.tnorm_op(binary(f))
    }

    pub fn tconorm<F>(self, f: F) -> Self
    where
        F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.tconorm_op(binary(f))
    }

    pub fn implication<F>(self, f: F) -> Self
    where
        F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.implication_op(binary(f))
    }

    pub fn equivalence<F>(mut self, f: F) -> Self
    where
        F: Fn(&Tensor, &Tensor) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.equivalence = Some(binary(f));
        self
    }

    pub fn universal<F>(self, f: F) -> Self
    where
        F: Fn(&Tensor, usize) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.universal_op(reduce(f))
    }

    pub fn existential<F>(self, f: F) -> Self
    where
        F: Fn(&Tensor, usize) -> Result<Tensor> + Send + Sync + 'static,
    {
        self.existential_op(reduce(f))
    }

    fn tnorm_op(mut self, f: BinaryOp) -> Self {
        self.tnorm = Some(f);
        self
    }

    fn tconorm_op(mut self, f: BinaryOp) -> Self {
        self.tconorm = Some(f);
        self
    }

    fn implication_op(mut self, f: BinaryOp) -> Self {
        self.implication = Some(f);
        self
    }

    fn universal_op(mut self, f: Aggregator) -> Self {
        self.universal = Some(f);
        self
    }

    fn existential_op(mut self, f: Aggregator) -> Self {
        self.existential = Some(f);
        self
    }

    pub fn projection(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<OperatorSet> {
        if !(0.0..1.0).contains(&self.epsilon) {
            return Err(FtlError::Config(format!(
                "projection epsilon must lie in [0, 1), got {}",
                self.epsilon
            )));
        }
        let missing: Vec<&str> = [
            ("negation", self.negation.is_none()),
            ("t-norm", self.tnorm.is_none()),
            ("t-conorm", self.tconorm.is_none()),
            ("implication", self.implication.is_none()),
            ("universal aggregator", self.universal.is_none()),
            ("existential aggregator", self.existential.is_none()),
        ]
        .into_iter()
        .filter(|(_, absent)| *absent)
        .map(|(name, _)| name)
        .collect();
        if !missing.is_empty() {
            return Err(FtlError::Config(format!(
                "operator set `{}` is missing: {}",
                self.name,
                missing.join(", ")
            )));
        }
        Ok(self.assemble())
    }

    /// Wrap the operators with projection and derive equivalence. Every
    /// required operator must be present; `build` checks this.
    fn assemble(self) -> OperatorSet {
        let eps = self.epsilon;
        let negation = self.negation.unwrap_or_else(|| unary(ops::negation));
        let tnorm = self.tnorm.unwrap_or_else(|| binary(ops::tnorm_product));
        let tconorm = self.tconorm.unwrap_or_else(|| binary(ops::tconorm_product));
        let implication = self
            .implication
            .unwrap_or_else(|| binary(ops::s_implication(ops::tconorm_product)));
        let universal = self.universal.unwrap_or_else(|| reduce(ops::minimum));
        let existential = self.existential.unwrap_or_else(|| reduce(ops::maximum));

        let (tnorm, tconorm, implication, universal, existential) = if eps > 0.0 {
            (
                binary(move |a, b| tnorm(&ops::project_up(a, eps)?, &ops::project_up(b, eps)?)),
                binary(move |a, b| {
                    tconorm(&ops::project_down(a, eps)?, &ops::project_down(b, eps)?)
                }),
                binary(move |a, c| {
                    implication(&ops::project_up(a, eps)?, &ops::project_down(c, eps)?)
                }),
                reduce(move |t, dim| universal(&ops::project_down(t, eps)?, dim)),
                reduce(move |t, dim| existential(&ops::project_up(t, eps)?, dim)),
            )
        } else {
            (tnorm, tconorm, implication, universal, existential)
        };

        let equivalence = self.equivalence.unwrap_or_else(|| {
            let (t, i) = (tnorm.clone(), implication.clone());
            binary(move |a, b| t(&i(a, b)?, &i(b, a)?))
        });

        OperatorSet {
            name: self.name,
            negation,
            tnorm,
            tconorm,
            implication,
            equivalence,
            universal,
            existential,
        }
    }
}
