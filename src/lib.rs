//! FTL: Fuzzy Tensor Logic
//!
//! A first-order logic whose truth values live in `[0, 1]` and whose
//! evaluation is tensor computation, so knowledge bases can be trained end to
//! end alongside neural predicates.
//!
//! # Key Insight
//!
//! Quantifiers are reductions. `forall x: D. P(x)` evaluates `P` on the whole
//! domain table of `D` in one batch and folds the result with a differentiable
//! aggregator, so `1 - satisfaction` is an ordinary loss.
//!
//! ```ignore
//! let sig = Signature::builder().sort("D").predicate("P", &["D"]).build()?;
//! let mut structure = Structure::new(Arc::new(sig), &Device::Cpu);
//! structure.set_domain("D", embedding::index_domain(3, &Device::Cpu)?)?;
//! structure.set_predicate("P", TablePredicate::learnable(&[3], &Device::Cpu)?)?;
//!
//! let mut kb = KnowledgeBase::with_structure(Arc::new(structure), Arc::new(OperatorSet::standard_product()));
//! kb.add_formula("exists x. P(x)", 1.0)?;
//! let mut model = Model::new(kb, TrainConfig::default())?;
//! model.compile()?;
//! model.train(&mut Vec::<Assignment>::new())?;
//! ```

pub mod error;
pub mod fuzzy;
pub mod runtime;
pub mod signature;
pub mod structure;
pub mod syntax;

pub use error::{FtlError, Result};
pub use fuzzy::{AggregatorKind, ImplicationKind, OperatorConfig, OperatorSet, TNormFamily};
pub use runtime::{
    default_device, Assignment, Interpretation, KbAggregation, KnowledgeBase, Model, ModelState,
    OptimizerType, TrainConfig, TrainingHistory,
};
pub use signature::{Signature, Sort};
pub use structure::{Predicate, Structure, TablePredicate};
pub use syntax::{parse, parse_term, parse_with, Formula, ParserConfig, Term};
