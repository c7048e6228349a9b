//! Evaluation and training of fuzzy knowledge bases.

mod grounding;
mod interpretation;
mod knowledge;
mod model;

use candle_core::Device;

pub use interpretation::{Assignment, Interpretation};
pub use knowledge::{FormulaEntry, KbAggregation, KnowledgeBase};
pub use model::{
    l2_regularizer, AssignmentSource, EarlyStopping, FnSource, LrSchedule, Model, ModelState,
    OptimizerType, Regularizer, StepReport, StopReason, TrainConfig, TrainingHistory,
};

/// Metal GPU if available, otherwise CPU.
pub fn default_device() -> Device {
    // Try Metal first (Apple Silicon), fall back to CPU
    #[cfg(feature = "metal")]
    let device = Device::new_metal(0).unwrap_or(Device::Cpu);
    #[cfg(not(feature = "metal"))]
    let device = Device::Cpu;
    device
}
