//! Structures: the tensor-valued meaning of a signature.
//!
//! A [`Structure`] holds one domain table per sort and one implementation per
//! predicate, functor and constant. It is the only place trainable parameters
//! enter the system; everything downstream reaches them through
//! [`Structure::trainable_vars`].

pub mod embedding;
mod symbols;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor, Var};
use indexmap::IndexMap;
use tracing::debug;

use crate::error::{FtlError, Result};
use crate::signature::{Signature, Sort};

pub use symbols::{
    CosinePredicate, FnFunctor, FnPredicate, Functor, LinearFunctor, MlpPredicate, Predicate,
    TableFunctor, TablePredicate,
};

/// Elements of a sort, or the value of a constant.
#[derive(Debug, Clone)]
pub enum Domain {
    Fixed(Tensor),
    Trainable(Var),
}

impl Domain {
    pub fn tensor(&self) -> Tensor {
        match self {
            Domain::Fixed(t) => t.clone(),
            Domain::Trainable(v) => v.as_tensor().clone(),
        }
    }
}

/// Tensor interpretation of every symbol of a signature.
pub struct Structure {
    signature: Arc<Signature>,
    device: Device,
    domains: IndexMap<Sort, Domain>,
    predicates: IndexMap<String, Box<dyn Predicate>>,
    functors: IndexMap<String, Box<dyn Functor>>,
    constants: IndexMap<String, Domain>,
}

impl std::fmt::Debug for Structure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Structure")
            .field("domains", &self.domains.keys().collect::<Vec<_>>())
            .field("predicates", &self.predicates.keys().collect::<Vec<_>>())
            .field("functors", &self.functors.keys().collect::<Vec<_>>())
            .field("constants", &self.constants.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Structure {
    pub fn new(signature: Arc<Signature>, device: &Device) -> Self {
        Self {
            signature,
            device: device.clone(),
            domains: IndexMap::new(),
            predicates: IndexMap::new(),
            functors: IndexMap::new(),
            constants: IndexMap::new(),
        }
    }

    pub fn signature(&self) -> &Arc<Signature> {
        &self.signature
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Float type for truth degrees the structure does not compute itself,
    /// such as quantification over an empty domain: that of the first
    /// floating-point domain, or F32.
    pub fn truth_dtype(&self) -> DType {
        self.domains
            .values()
            .map(|d| d.tensor().dtype())
            .find(|dtype| dtype.is_float())
            .unwrap_or(DType::F32)
    }

    fn declared_sort(&self, name: &str) -> Result<Sort> {
        self.signature
            .sort(name)
            .cloned()
            .ok_or_else(|| FtlError::Usage(format!("undeclared sort `{}`", name)))
    }

    /// Set the elements of `sort`: a tensor `[n, element dims..]`.
    pub fn set_domain(&mut self, sort: &str, elements: Tensor) -> Result<()> {
        let sort = self.declared_sort(sort)?;
        check_domain_rank(&sort, &elements)?;
        self.domains.insert(sort, Domain::Fixed(elements));
        Ok(())
    }

    /// Set learnable elements of `sort`, e.g. an embedding table.
    pub fn set_trainable_domain(&mut self, sort: &str, elements: Var) -> Result<()> {
        let sort = self.declared_sort(sort)?;
        check_domain_rank(&sort, elements.as_tensor())?;
        self.domains.insert(sort, Domain::Trainable(elements));
        Ok(())
    }

    pub fn set_predicate(&mut self, name: &str, predicate: impl Predicate + 'static) -> Result<()> {
        if self.signature.predicate(name).is_none() {
            return Err(FtlError::Usage(format!("undeclared predicate `{}`", name)));
        }
        self.predicates.insert(name.to_string(), Box::new(predicate));
        Ok(())
    }

    pub fn set_functor(&mut self, name: &str, functor: impl Functor + 'static) -> Result<()> {
        if self.signature.functor(name).is_none() {
            return Err(FtlError::Usage(format!("undeclared functor `{}`", name)));
        }
        self.functors.insert(name.to_string(), Box::new(functor));
        Ok(())
    }

    pub fn set_constant(&mut self, name: &str, value: Tensor) -> Result<()> {
        self.insert_constant(name, Domain::Fixed(value))
    }

    pub fn set_trainable_constant(&mut self, name: &str, value: Var) -> Result<()> {
        self.insert_constant(name, Domain::Trainable(value))
    }

    fn insert_constant(&mut self, name: &str, value: Domain) -> Result<()> {
        if self.signature.constant(name).is_none() {
            return Err(FtlError::Usage(format!("undeclared constant `{}`", name)));
        }
        self.constants.insert(name.to_string(), value);
        Ok(())
    }

    pub fn has_domain(&self, sort: &Sort) -> bool {
        self.domains.contains_key(sort)
    }

    /// Elements of `sort`, shape `[n, element dims..]`.
    pub fn domain(&self, sort: &Sort) -> Result<Tensor> {
        self.domains
            .get(sort)
            .map(Domain::tensor)
            .ok_or_else(|| FtlError::Usage(format!("sort `{}` has no domain", sort)))
    }

    /// Value of a constant symbol: one element tensor.
    pub fn constant(&self, name: &str) -> Result<Tensor> {
        self.constants
            .get(name)
            .map(Domain::tensor)
            .ok_or_else(|| FtlError::Usage(format!("constant `{}` has no value", name)))
    }

    /// Truth degrees of `name` over argument batches `[B, element dims..]`.
    ///
    /// Returns `[B]`, or a rank-0 tensor for a 0-ary predicate.
    pub fn evaluate_predicate(&self, name: &str, args: &[Tensor]) -> Result<Tensor> {
        let predicate = self
            .predicates
            .get(name)
            .ok_or_else(|| FtlError::Usage(format!("predicate `{}` has no implementation", name)))?;
        let out = predicate.forward(args)?;

        let Some(first) = args.first() else {
            if out.elem_count() != 1 {
                return Err(FtlError::Usage(format!(
                    "0-ary predicate `{}` returned shape {:?}, expected a scalar",
                    name,
                    out.dims()
                )));
            }
            return Ok(out.reshape(())?);
        };
        let batch = first.dim(0)?;
        let dims = out.dims().to_vec();
        match dims.as_slice() {
            [b] if *b == batch => Ok(out),
            [b, 1] if *b == batch => Ok(out.squeeze(1)?),
            dims => Err(FtlError::Usage(format!(
                "predicate `{}` returned shape {:?}, expected [{}] or [{}, 1]",
                name, dims, batch, batch
            ))),
        }
    }

    /// Result elements of `name` over argument batches, `[B, result dims..]`.
    pub fn evaluate_functor(&self, name: &str, args: &[Tensor]) -> Result<Tensor> {
        let functor = self
            .functors
            .get(name)
            .ok_or_else(|| FtlError::Usage(format!("functor `{}` has no implementation", name)))?;
        let out = functor.forward(args)?;
        if let Some(first) = args.first() {
            let batch = first.dim(0)?;
            if out.rank() == 0 || out.dim(0)? != batch {
                return Err(FtlError::Usage(format!(
                    "functor `{}` returned shape {:?} for a batch of {}",
                    name,
                    out.dims(),
                    batch
                )));
            }
        }
        Ok(out)
    }

    /// True if `symbol` has an implementation or value.
    pub fn contains(&self, symbol: &str) -> bool {
        self.predicates.contains_key(symbol)
            || self.functors.contains_key(symbol)
            || self.constants.contains_key(symbol)
    }

    /// Declared predicates, functors and constants that have no implementation.
    pub fn missing_symbols(&self) -> Vec<String> {
        let predicates = self
            .signature
            .predicates()
            .map(|(name, _)| name)
            .filter(|name| !self.predicates.contains_key(*name));
        let functors = self
            .signature
            .functors()
            .map(|(name, _)| name)
            .filter(|name| !self.functors.contains_key(*name));
        let constants = self
            .signature
            .constants()
            .map(|(name, _)| name)
            .filter(|name| !self.constants.contains_key(*name));
        predicates.chain(functors).chain(constants).map(String::from).collect()
    }

    /// Declared sorts without a domain.
    pub fn missing_domains(&self) -> Vec<Sort> {
        self.signature
            .sorts()
            .filter(|sort| !self.domains.contains_key(*sort))
            .cloned()
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_symbols().is_empty() && self.missing_domains().is_empty()
    }

    /// Every trainable parameter, with a stable name.
    fn named_vars(&self) -> Vec<(String, Var)> {
        let mut out = Vec::new();
        for (sort, domain) in &self.domains {
            if let Domain::Trainable(v) = domain {
                out.push((format!("domain.{}", sort), v.clone()));
            }
        }
        for (name, value) in &self.constants {
            if let Domain::Trainable(v) = value {
                out.push((format!("constant.{}", name), v.clone()));
            }
        }
        for (name, p) in &self.predicates {
            for (i, v) in p.trainable_vars().into_iter().enumerate() {
                out.push((format!("predicate.{}.{}", name, i), v));
            }
        }
        for (name, f) in &self.functors {
            for (i, v) in f.trainable_vars().into_iter().enumerate() {
                out.push((format!("functor.{}.{}", name, i), v));
            }
        }
        out
    }

    pub fn trainable_vars(&self) -> Vec<Var> {
        self.named_vars().into_iter().map(|(_, v)| v).collect()
    }

    /// Write every trainable parameter to a safetensors file.
    pub fn save_trainable(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self
            .named_vars()
            .into_iter()
            .map(|(name, v)| (name, v.as_tensor().clone()))
            .collect();
        candle_core::safetensors::save(&tensors, path.as_ref())?;
        debug!(count = tensors.len(), path = %path.as_ref().display(), "saved trainable parameters");
        Ok(())
    }

    /// Restore trainable parameters written by [`Structure::save_trainable`].
    pub fn load_trainable(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &self.device)?;
        for (name, var) in self.named_vars() {
            let value = tensors.get(&name).ok_or_else(|| {
                FtlError::Usage(format!("checkpoint has no parameter `{}`", name))
            })?;
            var.set(value)?;
        }
        Ok(())
    }
}

fn check_domain_rank(sort: &Sort, elements: &Tensor) -> Result<()> {
    if elements.rank() == 0 {
        return Err(FtlError::Usage(format!(
            "domain of `{}` must have a leading element axis",
            sort
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig() -> Arc<Signature> {
        Arc::new(
            Signature::builder()
                .sort("D")
                .predicate("P", &["D"])
                .predicate("Rain", &[])
                .functor("f", &["D"], "D")
                .constant("a", "D")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_completeness() {
        let dev = Device::Cpu;
        let mut s = Structure::new(sig(), &dev);
        assert!(!s.is_complete());
        assert_eq!(s.missing_symbols(), vec!["P", "Rain", "f", "a"]);
        assert_eq!(s.missing_domains(), vec![Sort::new("D")]);

        s.set_domain("D", embedding::index_domain(3, &dev).unwrap()).unwrap();
        s.set_predicate("P", TablePredicate::fixed(Tensor::new(&[0.0f32, 1.0, 0.0], &dev).unwrap()).unwrap())
            .unwrap();
        s.set_predicate("Rain", FnPredicate::new(|_| Ok(Tensor::new(0.3f32, &Device::Cpu)?)))
            .unwrap();
        s.set_functor("f", FnFunctor::new(|args| Ok(args[0].clone()))).unwrap();
        s.set_constant("a", Tensor::new(1.0f32, &dev).unwrap()).unwrap();
        assert!(s.is_complete());
        assert!(s.contains("f"));
    }

    #[test]
    fn test_truth_dtype_follows_domains() {
        let dev = Device::Cpu;
        let mut s = Structure::new(sig(), &dev);
        assert_eq!(s.truth_dtype(), DType::F32);
        s.set_domain("D", Tensor::new(&[0.0f64, 1.0], &dev).unwrap()).unwrap();
        assert_eq!(s.truth_dtype(), DType::F64);
    }

    #[test]
    fn test_undeclared_symbols_rejected() {
        let mut s = Structure::new(sig(), &Device::Cpu);
        let t = Tensor::new(&[1.0f32], &Device::Cpu).unwrap();
        assert!(matches!(s.set_domain("E", t.clone()), Err(FtlError::Usage(_))));
        assert!(matches!(s.set_constant("b", t), Err(FtlError::Usage(_))));
        assert!(matches!(s.domain(&Sort::new("D")), Err(FtlError::Usage(_))));
    }

    #[test]
    fn test_predicate_shape_validation() {
        let dev = Device::Cpu;
        let mut s = Structure::new(sig(), &dev);
        s.set_predicate("P", FnPredicate::new(|args| Ok(args[0].unsqueeze(1)?)))
            .unwrap();
        let x = Tensor::new(&[0.1f32, 0.2], &dev).unwrap();
        assert_eq!(s.evaluate_predicate("P", &[x.clone()]).unwrap().dims(), &[2]);

        s.set_predicate("P", FnPredicate::new(|args| Ok(args[0].unsqueeze(0)?)))
            .unwrap();
        assert!(matches!(s.evaluate_predicate("P", &[x]), Err(FtlError::Usage(_))));
    }

    #[test]
    fn test_trainable_round_trip() {
        let dev = Device::Cpu;
        let mut s = Structure::new(sig(), &dev);
        s.set_predicate("P", TablePredicate::learnable(&[3], &dev).unwrap()).unwrap();
        s.set_trainable_domain("D", embedding::trainable_embeddings(3, 4, &dev).unwrap())
            .unwrap();
        let vars = s.trainable_vars();
        assert_eq!(vars.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.safetensors");
        s.save_trainable(&path).unwrap();
        let before = vars[0].as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        vars[0].set(&vars[0].as_tensor().zeros_like().unwrap()).unwrap();
        s.load_trainable(&path).unwrap();
        let after = vars[0].as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(before, after);
    }
}
