//! Knowledge base: weighted formulas over one interpretation.
//!
//! Formulas are added as text or parse trees, then compiled together against
//! the shared signature. Satisfaction of the whole base is a weighted
//! aggregate of the per-formula truth degrees and is differentiable in the
//! structure's trainable parameters.

use std::sync::Arc;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::interpretation::{Assignment, Interpretation};
use crate::error::{FtlError, Result};
use crate::fuzzy::OperatorSet;
use crate::signature::Signature;
use crate::structure::Structure;
use crate::syntax::{parse, parse_with, Formula, ParserConfig, Quantifier};

/// How per-formula satisfactions combine into one degree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KbAggregation {
    /// `sum(w_i * s_i) / sum(w)`
    #[default]
    WeightedMean,
    /// `prod(s_i ^ (w_i / sum(w)))`
    WeightedProduct,
    /// The operator set's universal aggregator across formulas. Weights must
    /// all be 1.
    Universal,
}

/// One weighted formula.
#[derive(Debug, Clone)]
pub struct FormulaEntry {
    source: String,
    tree: Option<Formula>,
    weight: f64,
}

impl FormulaEntry {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The parse tree, once compiled (or when added as a tree).
    pub fn tree(&self) -> Option<&Formula> {
        self.tree.as_ref()
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }
}

pub struct KnowledgeBase {
    interpretation: Arc<Interpretation>,
    aggregation: KbAggregation,
    parser: ParserConfig,
    entries: Vec<FormulaEntry>,
    compiled: bool,
}

impl KnowledgeBase {
    pub fn new(interpretation: Arc<Interpretation>) -> Self {
        Self {
            interpretation,
            aggregation: KbAggregation::default(),
            parser: ParserConfig::standard(),
            entries: Vec::new(),
            compiled: false,
        }
    }

    /// Shorthand for a knowledge base over a fresh interpretation.
    pub fn with_structure(structure: Arc<Structure>, operators: Arc<OperatorSet>) -> Self {
        Self::new(Arc::new(Interpretation::new(structure, operators)))
    }

    pub fn with_aggregation(mut self, aggregation: KbAggregation) -> Self {
        self.set_aggregation(aggregation);
        self
    }

    pub fn set_aggregation(&mut self, aggregation: KbAggregation) {
        self.aggregation = aggregation;
        self.compiled = false;
    }

    pub fn aggregation(&self) -> KbAggregation {
        self.aggregation
    }

    /// Syntax used for formula text given to [`add_formula`](Self::add_formula),
    /// [`query`](Self::query) and [`contains`](Self::contains).
    pub fn with_parser(mut self, parser: ParserConfig) -> Self {
        self.parser = parser;
        self.compiled = false;
        self
    }

    pub fn parser(&self) -> &ParserConfig {
        &self.parser
    }

    pub fn interpretation(&self) -> &Arc<Interpretation> {
        &self.interpretation
    }

    pub fn signature(&self) -> &Arc<Signature> {
        self.interpretation.structure().signature()
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Add a formula in concrete syntax. It is parsed by [`compile`](Self::compile).
    pub fn add_formula(&mut self, text: &str, weight: f64) -> Result<()> {
        check_weight(weight)?;
        self.entries.push(FormulaEntry {
            source: text.trim().to_string(),
            tree: None,
            weight,
        });
        self.compiled = false;
        Ok(())
    }

    /// Add an already-built parse tree.
    ///
    /// The tree must be well formed under this base's signature: its
    /// canonical text has to parse back to the same tree.
    pub fn add_tree(&mut self, tree: Formula, weight: f64) -> Result<()> {
        check_weight(weight)?;
        let source = tree.to_string();
        let reparsed = parse(&source, self.signature()).map_err(|e| {
            FtlError::Compilation(format!("`{}` does not fit the signature: {}", source, e))
        })?;
        if reparsed != tree {
            return Err(FtlError::Compilation(format!(
                "`{}` disagrees with the signature's sorts",
                source
            )));
        }
        self.entries.push(FormulaEntry {
            source,
            tree: Some(tree),
            weight,
        });
        self.compiled = false;
        Ok(())
    }

    /// Parse pending formulas and check the structure covers every symbol
    /// and sort they use.
    ///
    /// All or nothing: on error the base stays uncompiled and no entry
    /// changes.
    pub fn compile(&mut self) -> Result<()> {
        let structure = self.interpretation.structure();
        let mut trees = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let tree = match &entry.tree {
                Some(tree) => tree.clone(),
                None => parse_with(&entry.source, self.signature(), &self.parser).map_err(|e| {
                    FtlError::Compilation(format!("in `{}`: {}", entry.source, e))
                })?,
            };
            check_coverage(structure, &tree)
                .map_err(|msg| FtlError::Compilation(format!("in `{}`: {}", entry.source, msg)))?;
            trees.push(tree);
        }

        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        if !self.entries.is_empty() && total == 0.0 {
            return Err(FtlError::Compilation(
                "all formula weights are zero".to_string(),
            ));
        }
        if self.aggregation == KbAggregation::Universal
            && self.entries.iter().any(|e| e.weight != 1.0)
        {
            return Err(FtlError::Compilation(
                "universal aggregation requires every weight to be 1".to_string(),
            ));
        }

        for (entry, tree) in self.entries.iter_mut().zip(trees) {
            entry.tree = Some(tree);
        }
        self.compiled = true;
        debug!(
            formulas = self.entries.len(),
            aggregation = ?self.aggregation,
            "compiled knowledge base"
        );
        Ok(())
    }

    /// Satisfaction of each formula: rank-0 tensors, one per formula.
    ///
    /// `assignments` holds one assignment per formula, or is empty when
    /// every formula is closed.
    pub fn formula_satisfactions(&self, assignments: &[Assignment]) -> Result<Vec<Tensor>> {
        if !self.compiled {
            return Err(FtlError::Compilation(
                "knowledge base must be compiled before evaluation".to_string(),
            ));
        }
        let empty = Assignment::new();
        if !assignments.is_empty() && assignments.len() != self.entries.len() {
            return Err(FtlError::Usage(format!(
                "expected {} assignments (one per formula), got {}",
                self.entries.len(),
                assignments.len()
            )));
        }

        let mut out = Vec::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            let tree = entry.tree.as_ref().ok_or_else(|| {
                FtlError::Compilation(format!("`{}` is not compiled", entry.source))
            })?;
            let assignment = assignments.get(i).unwrap_or(&empty);
            if assignment.is_empty() && !tree.is_closed() {
                return Err(FtlError::Usage(format!(
                    "`{}` has free variables but no assignment",
                    entry.source
                )));
            }
            out.push(
                self.interpretation
                    .evaluate_knowledge_base_term(tree, assignment)?,
            );
        }
        Ok(out)
    }

    /// Aggregate satisfaction of the whole base, a rank-0 tensor.
    pub fn satisfaction(&self, assignments: &[Assignment]) -> Result<Tensor> {
        let sats = self.formula_satisfactions(assignments)?;
        self.aggregate(&sats)
    }

    /// Combine per-formula satisfactions, as returned by
    /// [`formula_satisfactions`](Self::formula_satisfactions).
    pub fn aggregate(&self, sats: &[Tensor]) -> Result<Tensor> {
        if sats.len() != self.entries.len() {
            return Err(FtlError::Usage(format!(
                "expected {} satisfactions, got {}",
                self.entries.len(),
                sats.len()
            )));
        }
        let structure = self.interpretation.structure();
        let device = structure.device();
        if sats.is_empty() {
            return Ok(Tensor::ones((), structure.truth_dtype(), device)?);
        }

        let stacked = Tensor::stack(sats, 0)?;
        let total: f64 = self.entries.iter().map(|e| e.weight).sum();
        match self.aggregation {
            KbAggregation::WeightedMean => {
                let weights: Vec<f32> = self.entries.iter().map(|e| e.weight as f32).collect();
                let weights = Tensor::from_vec(weights, sats.len(), device)?.to_dtype(stacked.dtype())?;
                Ok((stacked * weights)?.sum_all()?.affine(1.0 / total, 0.0)?)
            }
            KbAggregation::WeightedProduct => {
                let mut acc: Option<Tensor> = None;
                for (s, entry) in sats.iter().zip(&self.entries) {
                    let term = s.powf(entry.weight / total)?;
                    acc = Some(match acc {
                        Some(acc) => (acc * term)?,
                        None => term,
                    });
                }
                acc.ok_or_else(|| FtlError::Usage("empty knowledge base".to_string()))
            }
            KbAggregation::Universal => self
                .interpretation
                .operators()
                .aggregate(Quantifier::Forall, &stacked, 0),
        }
    }

    /// Evaluate an ad-hoc formula that is not part of the base.
    pub fn query(&self, text: &str, assignment: &Assignment) -> Result<Tensor> {
        if !self.compiled {
            return Err(FtlError::Usage(
                "compile the knowledge base before querying it".to_string(),
            ));
        }
        let formula = parse_with(text, self.signature(), &self.parser)?;
        check_coverage(self.interpretation.structure(), &formula).map_err(FtlError::Usage)?;
        self.interpretation.evaluate(&formula, assignment)
    }

    /// True if the base holds `text`, compared as written or as a parse tree.
    pub fn contains(&self, text: &str) -> bool {
        let text = text.trim();
        let parsed = parse_with(text, self.signature(), &self.parser).ok();
        self.entries.iter().any(|e| {
            e.source == text
                || match (&parsed, &e.tree) {
                    (Some(p), Some(t)) => p == t,
                    (Some(p), None) => {
                        parse_with(&e.source, self.signature(), &self.parser).ok().as_ref()
                            == Some(p)
                    }
                    (None, _) => false,
                }
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormulaEntry> {
        self.entries.iter()
    }

    /// Compiled trees, in insertion order.
    pub fn trees(&self) -> Result<Vec<&Formula>> {
        self.entries
            .iter()
            .map(|e| {
                e.tree.as_ref().filter(|_| self.compiled).ok_or_else(|| {
                    FtlError::Compilation(format!("`{}` is not compiled", e.source))
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for KnowledgeBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnowledgeBase")
            .field("formulas", &self.entries.len())
            .field("aggregation", &self.aggregation)
            .field("compiled", &self.compiled)
            .finish()
    }
}

fn check_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(FtlError::Usage(format!(
            "formula weight must be finite and non-negative, got {}",
            weight
        )));
    }
    Ok(())
}

fn check_coverage(structure: &Structure, formula: &Formula) -> std::result::Result<(), String> {
    let missing: Vec<String> = formula
        .predicates()
        .into_iter()
        .chain(formula.functors())
        .chain(formula.constants())
        .filter(|name| !structure.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(format!("no interpretation for {}", missing.join(", ")));
    }
    for sort in formula.sorts() {
        if !structure.has_domain(&sort) {
            return Err(format!("sort `{}` has no domain", sort));
        }
    }
    Ok(())
}
