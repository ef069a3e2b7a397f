mod report;
mod runner;

pub use self::report::{LedgerOutcome, RunReport, StepId, StepOutcome, StepStatus};
pub use self::runner::{SequenceConfig, SequenceRunner};
