//! Training loop: maximise knowledge-base satisfaction by gradient descent on
//! the structure's trainable parameters.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::optim::{AdamW, Optimizer as CandleOptimizer, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::interpretation::Assignment;
use super::knowledge::KnowledgeBase;
use crate::error::{FtlError, Result};

/// Optimizer type for training.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerType {
    /// Stochastic Gradient Descent
    Sgd,
    /// AdamW (Adam with decoupled weight decay)
    #[default]
    #[serde(alias = "adamw")]
    AdamW,
}

/// Learning rate as a function of the step count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrSchedule {
    #[default]
    Constant,
    /// Multiply by `gamma` every `every` steps.
    StepDecay { every: usize, gamma: f64 },
    /// Multiply by `gamma` after each step.
    Exponential { gamma: f64 },
}

impl LrSchedule {
    /// Rate to use after `steps` completed steps.
    pub fn rate(&self, base: f64, steps: usize) -> f64 {
        match *self {
            LrSchedule::Constant => base,
            LrSchedule::StepDecay { every, gamma } => {
                base * gamma.powi((steps / every.max(1)) as i32)
            }
            LrSchedule::Exponential { gamma } => base * gamma.powi(steps as i32),
        }
    }
}

/// Stop when the loss has not improved by `min_delta` for `patience` epochs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    #[serde(default)]
    pub min_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub optimizer: OptimizerType,
    /// AdamW only
    pub weight_decay: f64,
    pub schedule: LrSchedule,
    pub early_stopping: Option<EarlyStopping>,
    /// Converge once satisfaction reaches this value.
    pub target_satisfaction: Option<f64>,
    /// Log progress every this many epochs; 0 disables.
    pub log_every: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 0.01,
            optimizer: OptimizerType::AdamW,
            weight_decay: 0.0,
            schedule: LrSchedule::Constant,
            early_stopping: None,
            target_satisfaction: None,
            log_every: 10,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(FtlError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return Err(FtlError::Config(format!(
                "weight_decay must be non-negative, got {}",
                self.weight_decay
            )));
        }
        match self.schedule {
            LrSchedule::StepDecay { every: 0, .. } => {
                return Err(FtlError::Config("step decay needs every > 0".to_string()))
            }
            LrSchedule::StepDecay { gamma, .. } | LrSchedule::Exponential { gamma }
                if !(gamma.is_finite() && gamma > 0.0) =>
            {
                return Err(FtlError::Config(format!(
                    "schedule gamma must be positive, got {}",
                    gamma
                )))
            }
            _ => {}
        }
        if let Some(early) = &self.early_stopping {
            if early.patience == 0 {
                return Err(FtlError::Config(
                    "early stopping needs patience > 0".to_string(),
                ));
            }
            if !(early.min_delta.is_finite() && early.min_delta >= 0.0) {
                return Err(FtlError::Config(format!(
                    "early stopping min_delta must be non-negative, got {}",
                    early.min_delta
                )));
            }
        }
        if let Some(target) = self.target_satisfaction {
            if !(0.0..=1.0).contains(&target) {
                return Err(FtlError::Config(format!(
                    "target_satisfaction must lie in [0, 1], got {}",
                    target
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Ran the configured number of epochs.
    EpochBudget,
    /// A loss or gradient was NaN or infinite.
    NumericFailure,
}

/// Lifecycle of a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    /// Knowledge base not compiled yet
    Uninitialized,
    Ready,
    /// Inside a training step
    Training,
    /// Early stopping or target satisfaction reached
    Converged,
    Stopped(StopReason),
}

impl ModelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelState::Converged | ModelState::Stopped(_))
    }
}

/// Outcome of one optimisation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub loss: f64,
    pub satisfaction: f64,
    pub learning_rate: f64,
}

/// Per-epoch record of a training run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub satisfaction: Vec<f64>,
    /// `formula_satisfaction[i][epoch]`
    pub formula_satisfaction: Vec<Vec<f64>>,
    /// Same layout, for the validation knowledge base.
    pub validation_satisfaction: Vec<Vec<f64>>,
    pub learning_rate: Vec<f64>,
}

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.loss.len()
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.loss.iter().copied().reduce(f64::min)
    }
}

/// Supplies the assignments for each training step.
pub trait AssignmentSource {
    /// One assignment per knowledge-base formula, or none for a closed base.
    fn next_batch(&mut self, epoch: usize) -> Result<Vec<Assignment>>;
}

impl AssignmentSource for Vec<Assignment> {
    fn next_batch(&mut self, _epoch: usize) -> Result<Vec<Assignment>> {
        Ok(self.clone())
    }
}

/// Adapts a closure into an [`AssignmentSource`], e.g. to sample mini-batches.
pub struct FnSource<F>(F);

impl<F> FnSource<F>
where
    F: FnMut(usize) -> Result<Vec<Assignment>>,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> AssignmentSource for FnSource<F>
where
    F: FnMut(usize) -> Result<Vec<Assignment>>,
{
    fn next_batch(&mut self, epoch: usize) -> Result<Vec<Assignment>> {
        (self.0)(epoch)
    }
}

/// Extra loss term over the trainable parameters.
pub type Regularizer = Box<dyn Fn(&[Var]) -> Result<Tensor> + Send + Sync>;

/// `lambda * sum(v^2)` over all parameters.
pub fn l2_regularizer(lambda: f64) -> Regularizer {
    Box::new(move |vars: &[Var]| -> Result<Tensor> {
        let mut total: Option<Tensor> = None;
        for var in vars {
            let sq = var.as_tensor().sqr()?.sum_all()?;
            total = Some(match total {
                Some(t) => (t + sq)?,
                None => sq,
            });
        }
        match total {
            Some(t) => Ok(t.affine(lambda, 0.0)?),
            None => Err(FtlError::Usage("no trainable parameters to regularise".to_string())),
        }
    })
}

enum Optimizer {
    Sgd(SGD),
    AdamW(AdamW),
}

impl Optimizer {
    fn new(config: &TrainConfig, vars: Vec<Var>) -> Result<Self> {
        Ok(match config.optimizer {
            OptimizerType::Sgd => Self::Sgd(SGD::new(vars, config.learning_rate)?),
            OptimizerType::AdamW => {
                let params = ParamsAdamW {
                    lr: config.learning_rate,
                    weight_decay: config.weight_decay,
                    ..Default::default()
                };
                Self::AdamW(AdamW::new(vars, params)?)
            }
        })
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::Sgd(opt) => opt.step(grads)?,
            Self::AdamW(opt) => opt.step(grads)?,
        }
        Ok(())
    }

    fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd(opt) => opt.set_learning_rate(lr),
            Self::AdamW(opt) => opt.set_learning_rate(lr),
        }
    }
}

/// True if no gradient holds a NaN or infinity.
fn gradients_finite(grads: &GradStore, vars: &[Var]) -> Result<bool> {
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let vals = grad.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
            if vals.iter().any(|v| !v.is_finite()) {
                return Ok(false);
            }
        }
    }
    Ok(true)
}

fn scalar(t: &Tensor) -> Result<f64> {
    Ok(t.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?)
}

/// A knowledge base bound to an optimizer over its structure's parameters.
pub struct Model {
    kb: KnowledgeBase,
    config: TrainConfig,
    state: ModelState,
    vars: Vec<Var>,
    optimizer: Option<Optimizer>,
    regularizer: Option<Regularizer>,
    validation: Option<(KnowledgeBase, Vec<Assignment>)>,
    history: TrainingHistory,
    steps: usize,
    best_loss: Option<f64>,
    stale_epochs: usize,
}

impl Model {
    pub fn new(kb: KnowledgeBase, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            kb,
            config,
            state: ModelState::Uninitialized,
            vars: Vec::new(),
            optimizer: None,
            regularizer: None,
            validation: None,
            history: TrainingHistory::default(),
            steps: 0,
            best_loss: None,
            stale_epochs: 0,
        })
    }

    pub fn with_regularizer(mut self, regularizer: Regularizer) -> Self {
        self.regularizer = Some(regularizer);
        self
    }

    /// Track a second knowledge base during training without training on it.
    /// It must share this model's signature.
    pub fn with_validation(mut self, kb: KnowledgeBase, assignments: Vec<Assignment>) -> Result<Self> {
        if kb.signature() != self.kb.signature() {
            return Err(FtlError::Usage(
                "validation knowledge base must share the model's signature".to_string(),
            ));
        }
        self.validation = Some((kb, assignments));
        self.state = ModelState::Uninitialized;
        Ok(self)
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn trainable_vars(&self) -> &[Var] {
        &self.vars
    }

    /// Compile the knowledge base(s) and build the optimizer.
    pub fn compile(&mut self) -> Result<()> {
        if self.state.is_terminal() || self.state == ModelState::Training {
            return Err(FtlError::Usage(format!(
                "cannot compile a model in state {:?}",
                self.state
            )));
        }
        if !self.kb.is_compiled() {
            self.kb.compile()?;
        }
        if let Some((validation, _)) = &mut self.validation {
            if !validation.is_compiled() {
                validation.compile()?;
            }
        }
        self.vars = self.kb.interpretation().structure().trainable_vars();
        self.optimizer = Some(Optimizer::new(&self.config, self.vars.clone())?);
        self.state = ModelState::Ready;
        debug!(params = self.vars.len(), optimizer = ?self.config.optimizer, "model compiled");
        Ok(())
    }

    /// Replace the training configuration, then [`reset`](Self::reset).
    pub fn set_config(&mut self, config: TrainConfig) -> Result<()> {
        if self.state == ModelState::Training {
            return Err(FtlError::Usage("cannot reconfigure during a step".to_string()));
        }
        config.validate()?;
        self.config = config;
        self.reset()
    }

    /// Back to `Ready` with fresh optimizer state and an empty history.
    /// Parameters keep their current values.
    pub fn reset(&mut self) -> Result<()> {
        self.state = ModelState::Uninitialized;
        self.history = TrainingHistory::default();
        self.steps = 0;
        self.best_loss = None;
        self.stale_epochs = 0;
        self.compile()
    }

    fn check_ready(&self) -> Result<()> {
        match self.state {
            ModelState::Ready => Ok(()),
            ModelState::Uninitialized => Err(FtlError::Usage(
                "model is not compiled; call compile() first".to_string(),
            )),
            state => Err(FtlError::Usage(format!(
                "model is {:?}; call reset() before training again",
                state
            ))),
        }
    }

    /// One optimisation step on `assignments`.
    pub fn step(&mut self, assignments: &[Assignment]) -> Result<StepReport> {
        self.check_ready()?;
        self.state = ModelState::Training;
        let report = self.run_step(assignments);
        if self.state == ModelState::Training {
            self.state = ModelState::Ready;
        }
        report
    }

    fn run_step(&mut self, assignments: &[Assignment]) -> Result<StepReport> {
        let sats = self.kb.formula_satisfactions(assignments)?;
        let satisfaction = self.kb.aggregate(&sats)?;
        // Validation sees the same parameters as the training formulas, and
        // a failure here leaves both the parameters and the history untouched.
        let validation_sats = match &self.validation {
            Some((validation, data)) => Some(validation.formula_satisfactions(data)?),
            None => None,
        };
        let mut loss = satisfaction.affine(-1.0, 1.0)?;
        if let Some(regularizer) = &self.regularizer {
            loss = (loss + regularizer(&self.vars)?)?;
        }

        let loss_value = scalar(&loss)?;
        if !loss_value.is_finite() {
            return Err(self.numeric_failure(format!("loss is {}", loss_value)));
        }
        let grads = loss.backward()?;
        if !gradients_finite(&grads, &self.vars)? {
            return Err(self.numeric_failure("non-finite gradient".to_string()));
        }

        let lr = self.config.schedule.rate(self.config.learning_rate, self.steps);
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| FtlError::Usage("model is not compiled".to_string()))?;
        optimizer.step(&grads)?;
        self.steps += 1;
        optimizer.set_learning_rate(self.config.schedule.rate(self.config.learning_rate, self.steps));

        let satisfaction = scalar(&satisfaction)?;
        self.history.loss.push(loss_value);
        self.history.satisfaction.push(satisfaction);
        self.history.learning_rate.push(lr);
        record(&mut self.history.formula_satisfaction, &sats)?;
        if let Some(sats) = &validation_sats {
            record(&mut self.history.validation_satisfaction, sats)?;
        }

        debug!(step = self.steps, loss = loss_value, satisfaction, lr, "training step");
        Ok(StepReport {
            step: self.steps,
            loss: loss_value,
            satisfaction,
            learning_rate: lr,
        })
    }

    fn numeric_failure(&mut self, message: String) -> FtlError {
        warn!(step = self.steps, "stopping training: {}", message);
        self.state = ModelState::Stopped(StopReason::NumericFailure);
        FtlError::Numeric(message)
    }

    /// Run up to `config.epochs` steps, one per batch from `source`.
    pub fn train(&mut self, source: &mut impl AssignmentSource) -> Result<TrainingHistory> {
        self.check_ready()?;
        let epochs = self.config.epochs;
        info!(epochs, formulas = self.kb.len(), "training model");

        for epoch in 0..epochs {
            let batch = source.next_batch(epoch)?;
            let report = self.step(&batch)?;

            if self.config.log_every > 0 && (epoch + 1) % self.config.log_every == 0 {
                info!(
                    "epoch {}/{}: loss {:.6}, satisfaction {:.6}",
                    epoch + 1,
                    epochs,
                    report.loss,
                    report.satisfaction
                );
            }

            if let Some(target) = self.config.target_satisfaction {
                if report.satisfaction >= target {
                    info!(epoch = epoch + 1, "target satisfaction reached");
                    self.state = ModelState::Converged;
                    break;
                }
            }
            if let Some(early) = self.config.early_stopping {
                if self.improved(report.loss, early.min_delta) {
                    self.stale_epochs = 0;
                } else {
                    self.stale_epochs += 1;
                }
                if self.stale_epochs >= early.patience {
                    info!(epoch = epoch + 1, "loss stopped improving");
                    self.state = ModelState::Converged;
                    break;
                }
            }
        }

        if self.state == ModelState::Ready {
            self.state = ModelState::Stopped(StopReason::EpochBudget);
        }
        Ok(self.history.clone())
    }

    fn improved(&mut self, loss: f64, min_delta: f64) -> bool {
        match self.best_loss {
            Some(best) if loss > best - min_delta => false,
            _ => {
                self.best_loss = Some(loss);
                true
            }
        }
    }

    /// Per-formula truth degrees `[n]`, without gradient tracking.
    pub fn predict(&self, assignments: &[Assignment]) -> Result<Tensor> {
        if self.state == ModelState::Uninitialized {
            return Err(FtlError::Usage(
                "model is not compiled; call compile() first".to_string(),
            ));
        }
        let sats = self.kb.formula_satisfactions(assignments)?;
        if sats.is_empty() {
            let device = self.kb.interpretation().structure().device();
            return Ok(Tensor::zeros(0, candle_core::DType::F32, device)?);
        }
        Ok(Tensor::stack(&sats, 0)?.detach())
    }

    /// Evaluate an ad-hoc formula against the current parameters.
    pub fn evaluate(&self, text: &str, assignment: &Assignment) -> Result<Tensor> {
        Ok(self.kb.query(text, assignment)?.detach())
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("state", &self.state)
            .field("steps", &self.steps)
            .field("params", &self.vars.len())
            .field("kb", &self.kb)
            .finish()
    }
}

fn record(columns: &mut Vec<Vec<f64>>, sats: &[Tensor]) -> Result<()> {
    if columns.len() < sats.len() {
        columns.resize_with(sats.len(), Vec::new);
    }
    for (column, s) in columns.iter_mut().zip(sats) {
        column.push(scalar(s)?);
    }
    Ok(())
}
