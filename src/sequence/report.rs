use serde::Serialize;
use strum_macros::{Display, EnumIter};

/// The ordered acceptance steps, as they run.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Display, EnumIter, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    #[strum(to_string = "device_info")]
    DeviceInfo,
    #[strum(to_string = "battery_level")]
    BatteryLevel,
    #[strum(to_string = "tx_power")]
    TxPower,
    #[strum(to_string = "clock_sync")]
    ClockSync,
    #[strum(to_string = "led_exercise")]
    LedExercise,
    #[strum(to_string = "button_gate")]
    ButtonGate,
    #[strum(to_string = "motion_monitor")]
    MotionMonitor,
}

/// How one step ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[strum(to_string = "passed")]
    Passed,
    #[strum(to_string = "failed")]
    Failed,
    /// The step never ran because cancellation was observed first.
    #[strum(to_string = "skipped")]
    Skipped,
}

/// Result of one acceptance step.
#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    step: StepId,
    status: StepStatus,
    detail: String,
}

impl StepOutcome {
    pub(crate) fn passed(step: StepId, detail: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Passed,
            detail: detail.into(),
        }
    }

    pub(crate) fn failed(step: StepId, detail: impl Into<String>) -> Self {
        Self {
            step,
            status: StepStatus::Failed,
            detail: detail.into(),
        }
    }

    pub(crate) fn skipped(step: StepId) -> Self {
        Self {
            step,
            status: StepStatus::Skipped,
            detail: "cancellation observed before the step ran".to_string(),
        }
    }

    /// Which step this outcome belongs to.
    #[must_use]
    pub fn step(&self) -> StepId {
        self.step
    }

    /// How the step ended.
    #[must_use]
    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// Human-readable result summary.
    #[must_use]
    pub fn detail(&self) -> &str {
        &self.detail
    }
}

/// How the end-of-run ledger submission went.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum LedgerOutcome {
    /// The identity was appended for the first time.
    Recorded,
    /// The identity had already been through the station.
    AlreadyPresent,
    /// The ledger write failed; step outcomes are unaffected.
    Failed(String),
}

/// Structured result of one acceptance run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    device_id: String,
    local_name: Option<String>,
    steps: Vec<StepOutcome>,
    ledger: LedgerOutcome,
}

impl RunReport {
    pub(crate) fn new(
        device_id: String,
        local_name: Option<String>,
        steps: Vec<StepOutcome>,
        ledger: LedgerOutcome,
    ) -> Self {
        Self {
            device_id,
            local_name,
            steps,
            ledger,
        }
    }

    /// Identity of the tested device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Advertised name of the tested device, when present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Per-step outcomes in run order.
    #[must_use]
    pub fn steps(&self) -> &[StepOutcome] {
        &self.steps
    }

    /// Ledger submission outcome.
    #[must_use]
    pub fn ledger(&self) -> &LedgerOutcome {
        &self.ledger
    }

    /// Number of steps that passed.
    #[must_use]
    pub fn passed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|outcome| outcome.status() == StepStatus::Passed)
            .count()
    }

    /// Whether every step passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed_count() == self.steps.len()
    }
}
