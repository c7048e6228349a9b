//! Signatures: the declared vocabulary of sorts, predicates, functors and constants.
//!
//! A [`Signature`] is immutable once built. Parsers, structures and knowledge
//! bases hold it behind an `Arc` and validate against it.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::{FtlError, Result};
use crate::syntax::is_reserved_word;

/// A named domain tag, e.g. `Person`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort(String);

impl Sort {
    pub fn new(name: impl Into<String>) -> Self {
        Sort(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Sort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Sort {
    fn from(name: &str) -> Self {
        Sort::new(name)
    }
}

/// Argument and result sorts of a functor symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctorDecl {
    pub args: Vec<Sort>,
    pub result: Sort,
}

/// Unvalidated signature contents, as written in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureDef {
    pub sorts: Vec<Sort>,
    pub predicates: IndexMap<String, Vec<Sort>>,
    pub functors: IndexMap<String, FunctorDecl>,
    pub constants: IndexMap<String, Sort>,
}

/// Declared sorts and symbol arities.
///
/// Equality ignores declaration order: two signatures are equal when they
/// declare the same symbols with the same sorts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SignatureDef")]
pub struct Signature {
    sorts: IndexSet<Sort>,
    predicates: IndexMap<String, Vec<Sort>>,
    functors: IndexMap<String, FunctorDecl>,
    constants: IndexMap<String, Sort>,
}

impl Signature {
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder::default()
    }

    pub fn has_sort(&self, sort: &Sort) -> bool {
        self.sorts.contains(sort)
    }

    /// Look up a sort by name.
    pub fn sort(&self, name: &str) -> Option<&Sort> {
        self.sorts.iter().find(|s| s.name() == name)
    }

    pub fn sorts(&self) -> impl Iterator<Item = &Sort> {
        self.sorts.iter()
    }

    /// Argument sorts of a predicate.
    pub fn predicate(&self, name: &str) -> Option<&[Sort]> {
        self.predicates.get(name).map(|v| v.as_slice())
    }

    pub fn predicates(&self) -> impl Iterator<Item = (&str, &[Sort])> {
        self.predicates.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn functor(&self, name: &str) -> Option<&FunctorDecl> {
        self.functors.get(name)
    }

    pub fn functors(&self) -> impl Iterator<Item = (&str, &FunctorDecl)> {
        self.functors.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sort of a constant symbol.
    pub fn constant(&self, name: &str) -> Option<&Sort> {
        self.constants.get(name)
    }

    pub fn constants(&self) -> impl Iterator<Item = (&str, &Sort)> {
        self.constants.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// True if `symbol` is a declared predicate, functor or constant.
    pub fn contains(&self, symbol: &str) -> bool {
        self.predicates.contains_key(symbol)
            || self.functors.contains_key(symbol)
            || self.constants.contains_key(symbol)
    }
}

impl TryFrom<SignatureDef> for Signature {
    type Error = FtlError;

    fn try_from(def: SignatureDef) -> Result<Self> {
        let mut sorts = IndexSet::new();
        for sort in def.sorts {
            check_identifier(sort.name(), "sort")?;
            if !sorts.insert(sort.clone()) {
                return Err(FtlError::Config(format!("sort `{}` declared twice", sort)));
            }
        }

        let declared = |sort: &Sort, owner: &str| -> Result<()> {
            if sorts.contains(sort) {
                Ok(())
            } else {
                Err(FtlError::Config(format!(
                    "`{}` refers to undeclared sort `{}`",
                    owner, sort
                )))
            }
        };

        for (name, args) in &def.predicates {
            check_identifier(name, "predicate")?;
            for s in args {
                declared(s, name)?;
            }
        }
        for (name, decl) in &def.functors {
            check_identifier(name, "functor")?;
            for s in &decl.args {
                declared(s, name)?;
            }
            declared(&decl.result, name)?;
        }
        for (name, sort) in &def.constants {
            check_identifier(name, "constant")?;
            declared(sort, name)?;
        }

        let mut seen: IndexSet<&str> = IndexSet::new();
        let symbols = def
            .predicates
            .keys()
            .chain(def.functors.keys())
            .chain(def.constants.keys());
        for symbol in symbols {
            if !seen.insert(symbol.as_str()) {
                return Err(FtlError::Config(format!(
                    "symbol `{}` declared more than once",
                    symbol
                )));
            }
        }

        Ok(Signature {
            sorts,
            predicates: def.predicates,
            functors: def.functors,
            constants: def.constants,
        })
    }
}

fn check_identifier(name: &str, kind: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(FtlError::Config(format!("invalid {} name `{}`", kind, name)));
    }
    if is_reserved_word(name) {
        return Err(FtlError::Config(format!(
            "{} name `{}` is a reserved word",
            kind, name
        )));
    }
    Ok(())
}

/// Incremental signature construction, validated by [`SignatureBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct SignatureBuilder {
    def: SignatureDef,
}

impl SignatureBuilder {
    pub fn sort(mut self, name: &str) -> Self {
        self.def.sorts.push(Sort::new(name));
        self
    }

    pub fn predicate(mut self, name: &str, args: &[&str]) -> Self {
        let args = args.iter().map(|s| Sort::new(*s)).collect();
        self.def.predicates.insert(name.to_string(), args);
        self
    }

    pub fn functor(mut self, name: &str, args: &[&str], result: &str) -> Self {
        let decl = FunctorDecl {
            args: args.iter().map(|s| Sort::new(*s)).collect(),
            result: Sort::new(result),
        };
        self.def.functors.insert(name.to_string(), decl);
        self
    }

    pub fn constant(mut self, name: &str, sort: &str) -> Self {
        self.def.constants.insert(name.to_string(), Sort::new(sort));
        self
    }

    pub fn build(self) -> Result<Signature> {
        Signature::try_from(self.def)
    }
}
