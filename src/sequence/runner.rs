use std::time::Duration;

use bon::Builder;
use strum::IntoEnumIterator;
use time::OffsetDateTime;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::report::{LedgerOutcome, RunReport, StepId, StepOutcome, StepStatus};
use crate::codec::{ButtonPress, decode_motion};
use crate::error::InteractionError;
use crate::hw::DeviceSession;
use crate::ledger::DeviceLedger;
use crate::pipeline::{self, DEFAULT_PIPELINE_CAPACITY};
use crate::protocol::{self, EndpointId, LedMode, LedSetting};

/// Tunable parameters of one acceptance run.
#[derive(Debug, Clone, Builder)]
pub struct SequenceConfig {
    /// Advertised-name prefix identifying fixture devices.
    #[builder(default = "Lapita_".to_string())]
    pub name_prefix: String,
    /// Pause between LED colour writes so an operator can see each colour.
    #[builder(default = Duration::from_secs(1))]
    pub led_dwell: Duration,
    /// Interval between pipeline polls; bounds cancellation latency.
    #[builder(default = Duration::from_millis(100))]
    pub poll_interval: Duration,
    /// Button presses required before the gate step passes.
    #[builder(default = 2)]
    pub button_target: u32,
    /// How long the motion monitor observes the telemetry stream.
    #[builder(default = Duration::from_secs(5))]
    pub motion_window: Duration,
    /// Capacity of each notification pipeline.
    #[builder(default = DEFAULT_PIPELINE_CAPACITY)]
    pub pipeline_capacity: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Drives the ordered acceptance steps against one fixture device.
///
/// Steps are isolated: a failing step is recorded and the next one still
/// runs. The only fatal failure is the initial connect. The tested identity
/// is submitted to the ledger exactly once, after the last step, whether or
/// not steps failed.
#[derive(Debug)]
pub struct SequenceRunner {
    session: DeviceSession,
    ledger: DeviceLedger,
    config: SequenceConfig,
}

impl SequenceRunner {
    #[must_use]
    pub fn new(session: DeviceSession, ledger: DeviceLedger, config: SequenceConfig) -> Self {
        Self {
            session,
            ledger,
            config,
        }
    }

    /// Runs the full acceptance sequence.
    ///
    /// Cancellation is cooperative: the token is observed between steps and
    /// once per poll iteration inside the monitoring steps; steps that have
    /// not started when it fires are recorded as skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only when connecting to the device fails; every
    /// later failure is recorded in the report instead.
    #[instrument(skip(self, cancel), level = "info", fields(prefix = %self.config.name_prefix))]
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<RunReport, InteractionError> {
        self.session.connect(&self.config.name_prefix).await?;
        let (device_id, local_name) = match self.session.device() {
            Some(device) => (
                device.device_id().to_string(),
                device.local_name().map(str::to_string),
            ),
            None => (String::new(), None),
        };
        info!(device_id, ?local_name, "starting acceptance sequence");

        let mut steps = Vec::with_capacity(StepId::iter().len());
        for step in StepId::iter() {
            if cancel.is_cancelled() {
                info!(%step, "skipping step after cancellation");
                steps.push(StepOutcome::skipped(step));
                continue;
            }

            let outcome = match step {
                StepId::DeviceInfo => self.step_device_info().await,
                StepId::BatteryLevel => self.step_battery().await,
                StepId::TxPower => self.step_tx_power().await,
                StepId::ClockSync => self.step_clock_sync().await,
                StepId::LedExercise => self.step_led_exercise(cancel).await,
                StepId::ButtonGate => self.step_button_gate(cancel).await,
                StepId::MotionMonitor => self.step_motion_monitor(cancel).await,
            };
            match outcome.status() {
                StepStatus::Passed => info!(%step, detail = outcome.detail(), "step passed"),
                _ => warn!(%step, detail = outcome.detail(), "step did not pass"),
            }
            steps.push(outcome);
        }

        let ledger = match self.ledger.record_if_new(&device_id) {
            Ok(true) => LedgerOutcome::AlreadyPresent,
            Ok(false) => LedgerOutcome::Recorded,
            Err(error) => {
                warn!(%error, "ledger submission failed");
                LedgerOutcome::Failed(error.to_string())
            }
        };

        if let Err(error) = self.session.disconnect().await {
            warn!(%error, "session teardown reported an error");
        }

        Ok(RunReport::new(device_id, local_name, steps, ledger))
    }

    async fn step_device_info(&mut self) -> StepOutcome {
        let fields = [
            (EndpointId::ManufacturerName, "manufacturer"),
            (EndpointId::ModelNumber, "model"),
            (EndpointId::FirmwareRevision, "firmware"),
            (EndpointId::HardwareRevision, "hardware"),
        ];

        let mut values = Vec::with_capacity(fields.len());
        let mut unreadable = Vec::new();
        for (endpoint, label) in fields {
            match self.session.read(endpoint).await {
                Ok(payload) => {
                    let value = String::from_utf8_lossy(&payload).trim().to_string();
                    debug!(%endpoint, value, "device info field read");
                    values.push(format!("{label}={value}"));
                }
                Err(error) => {
                    warn!(%endpoint, %error, "device info field read failed");
                    unreadable.push(label);
                }
            }
        }

        if unreadable.is_empty() {
            StepOutcome::passed(StepId::DeviceInfo, values.join(", "))
        } else {
            StepOutcome::failed(
                StepId::DeviceInfo,
                format!("unreadable fields: {}", unreadable.join(", ")),
            )
        }
    }

    async fn step_battery(&mut self) -> StepOutcome {
        match self.session.read(EndpointId::BatteryLevel).await {
            Ok(payload) => match payload.first() {
                Some(&level) => StepOutcome::passed(StepId::BatteryLevel, format!("{level}%")),
                None => StepOutcome::failed(StepId::BatteryLevel, "empty battery payload"),
            },
            Err(error) => StepOutcome::failed(StepId::BatteryLevel, format!("read failed: {error}")),
        }
    }

    async fn step_tx_power(&mut self) -> StepOutcome {
        match self.session.read(EndpointId::TxPower).await {
            Ok(payload) => match payload.first() {
                Some(&raw) => {
                    let dbm = i8::from_le_bytes([raw]);
                    StepOutcome::passed(StepId::TxPower, format!("{dbm} dBm"))
                }
                None => StepOutcome::failed(StepId::TxPower, "empty TX power payload"),
            },
            Err(error) => StepOutcome::failed(StepId::TxPower, format!("read failed: {error}")),
        }
    }

    async fn step_clock_sync(&mut self) -> StepOutcome {
        let payload = protocol::clock_sync_payload(OffsetDateTime::now_utc());
        match self.session.write(EndpointId::CurrentTime, &payload).await {
            Ok(()) => StepOutcome::passed(
                StepId::ClockSync,
                format!("wrote {}", hex::encode(payload)),
            ),
            Err(error) => {
                StepOutcome::failed(StepId::ClockSync, format!("write failed: {error}"))
            }
        }
    }

    async fn step_led_exercise(&mut self, cancel: &CancellationToken) -> StepOutcome {
        if let Err(error) = self
            .session
            .write(EndpointId::LedMode, &[LedMode::On.to_byte()])
            .await
        {
            return StepOutcome::failed(
                StepId::LedExercise,
                format!("LED mode on failed: {error}"),
            );
        }

        let colours = [
            ("red", LedSetting::solid(0xFF, 0x00, 0x00)),
            ("green", LedSetting::solid(0x00, 0xFF, 0x00)),
            ("blue", LedSetting::solid(0x00, 0x00, 0xFF)),
        ];
        let mut failed_colours = Vec::new();
        let mut cancelled = false;
        for (colour, setting) in colours {
            if let Err(error) = self
                .session
                .write(EndpointId::LedSetting, &setting.to_bytes())
                .await
            {
                warn!(colour, %error, "LED setting write failed");
                failed_colours.push(colour);
            }

            let dwell_cancelled = tokio::select! {
                () = cancel.cancelled() => true,
                () = sleep(self.config.led_dwell) => false,
            };
            if dwell_cancelled {
                cancelled = true;
                break;
            }
        }

        // The LED is switched off even when colour writes failed or the run
        // was cancelled mid-exercise.
        let mode_off = self
            .session
            .write(EndpointId::LedMode, &[LedMode::Off.to_byte()])
            .await;

        if cancelled {
            return StepOutcome::failed(StepId::LedExercise, "cancelled mid-exercise");
        }
        if let Err(error) = mode_off {
            return StepOutcome::failed(
                StepId::LedExercise,
                format!("LED mode off failed: {error}"),
            );
        }
        if failed_colours.is_empty() {
            StepOutcome::passed(StepId::LedExercise, "red, green, blue cycled")
        } else {
            StepOutcome::failed(
                StepId::LedExercise,
                format!("failed colour writes: {}", failed_colours.join(", ")),
            )
        }
    }

    async fn step_button_gate(&mut self, cancel: &CancellationToken) -> StepOutcome {
        let monitor = match pipeline::arm(
            &mut self.session,
            EndpointId::ButtonEvent,
            self.config.pipeline_capacity,
            ButtonPress::from_payload,
        )
        .await
        {
            Ok(monitor) => monitor,
            Err(error) => {
                return StepOutcome::failed(
                    StepId::ButtonGate,
                    format!("arming failed: {error}"),
                );
            }
        };

        let target = self.config.button_target;
        let mut presses = 0u32;
        let reached = loop {
            for capture in monitor.drain() {
                presses += 1;
                info!(press = %capture.value, count = presses, "button press observed");
            }
            if presses >= target {
                break true;
            }
            if cancel.is_cancelled() {
                break false;
            }
            sleep(self.config.poll_interval).await;
        };

        if let Err(error) = monitor.disarm(&mut self.session).await {
            warn!(%error, "failed to disarm button monitor");
        }

        if reached {
            StepOutcome::passed(
                StepId::ButtonGate,
                format!("{presses} presses (target {target})"),
            )
        } else {
            StepOutcome::failed(
                StepId::ButtonGate,
                format!("cancelled after {presses} of {target} presses"),
            )
        }
    }

    async fn step_motion_monitor(&mut self, cancel: &CancellationToken) -> StepOutcome {
        match self
            .session
            .write(EndpointId::ImuEnable, &[protocol::IMU_ENABLE])
            .await
        {
            Ok(()) => debug!("IMU stream enabled"),
            Err(InteractionError::MissingEndpoint { .. }) => {
                debug!("IMU enable endpoint absent, older firmware streams unconditionally");
            }
            Err(error) => warn!(%error, "IMU enable write failed, monitoring anyway"),
        }

        let monitor = match pipeline::arm(
            &mut self.session,
            EndpointId::MotionData,
            self.config.pipeline_capacity,
            |payload| decode_motion(payload).map(Some),
        )
        .await
        {
            Ok(monitor) => monitor,
            Err(error) => {
                return StepOutcome::failed(
                    StepId::MotionMonitor,
                    format!("arming failed: {error}"),
                );
            }
        };

        // The observation window is a child token so external cancellation
        // also ends it.
        let window = cancel.child_token();
        let timer = tokio::spawn({
            let window = window.clone();
            let duration = self.config.motion_window;
            async move {
                sleep(duration).await;
                window.cancel();
            }
        });

        let mut samples = 0usize;
        loop {
            let captured = monitor.drain();
            if !captured.is_empty() {
                samples += captured.len();
                if let Some(latest) = captured.last() {
                    debug!(
                        count = samples,
                        accel_x = latest.value.accel_x,
                        accel_y = latest.value.accel_y,
                        accel_z = latest.value.accel_z,
                        "motion samples captured"
                    );
                }
            }
            if window.is_cancelled() {
                break;
            }
            sleep(self.config.poll_interval).await;
        }
        timer.abort();

        let dropped = monitor.dropped();
        let disarmed = monitor.disarm(&mut self.session).await;

        match self
            .session
            .write(EndpointId::ImuEnable, &[protocol::IMU_DISABLE])
            .await
        {
            Ok(()) => debug!("IMU stream disabled"),
            Err(InteractionError::MissingEndpoint { .. }) => {}
            Err(error) => warn!(%error, "IMU disable write failed"),
        }

        match disarmed {
            Ok(()) => StepOutcome::passed(
                StepId::MotionMonitor,
                format!("{samples} samples captured, {dropped} dropped"),
            ),
            Err(error) => StepOutcome::failed(
                StepId::MotionMonitor,
                format!("disarm failed after {samples} samples: {error}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn config_defaults_match_station_policy() {
        let config = SequenceConfig::default();
        assert_eq!("Lapita_", config.name_prefix);
        assert_eq!(Duration::from_secs(1), config.led_dwell);
        assert_eq!(Duration::from_millis(100), config.poll_interval);
        assert_eq!(2, config.button_target);
    }
}
