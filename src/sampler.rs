//! ==============================================================================
//! sampler.rs - periodic sensor sampling loop
//! ==============================================================================
//!
//! purpose:
//!     owns the polling cadence. each tick reads the three registers, converts
//!     them, swaps the new reading into the store and logs it.
//!
//! relationships:
//!     - reads: hal.rs (SensorSource, exclusively owned here)
//!     - writes: store.rs (ReadingsStore)
//!     - started/stopped by: supervisor.rs (via the cancellation token)
//!
//! ==============================================================================

use crate::domain::{RawSample, Reading};
use crate::hal::{Register, SensorError, SensorSource};
use crate::store::ReadingsStore;

use anyhow::{anyhow, Result};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct Sampler<S> {
    sensor: Option<S>,
    store: ReadingsStore,
    interval: Duration,
    show_data: bool,
    current: Reading,
}

/// read all three registers once; failures are logged and left as `None`
pub fn sample_once<S: SensorSource + ?Sized>(sensor: &mut S) -> RawSample {
    RawSample {
        temperature: keep(Register::Temperature, sensor.read_temperature()),
        humidity: keep(Register::Humidity, sensor.read_humidity()),
        pressure: keep(Register::Pressure, sensor.read_pressure()),
    }
}

fn keep(register: Register, result: Result<i32, SensorError>) -> Option<i32> {
    match result {
        Ok(raw) => Some(raw),
        Err(e) => {
            tracing::warn!(%register, error = %e, "Sensor read failed, keeping previous value");
            None
        }
    }
}

/// unix timestamp in milliseconds
fn timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl<S: SensorSource + 'static> Sampler<S> {
    pub fn new(sensor: S, store: ReadingsStore, interval: Duration, show_data: bool) -> Self {
        Self {
            sensor: Some(sensor),
            store,
            interval,
            show_data,
            current: Reading::default(),
        }
    }

    /// sample until the token is cancelled
    ///
    /// the first cycle runs immediately. the sensor is dropped (closed) when
    /// this returns.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_seconds = self.interval.as_secs_f64(), "Sampler started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.cycle().await {
                tracing::error!("Sampler stopping: {:#}", e);
                break;
            }
        }

        if let Some(sensor) = self.sensor.take() {
            tracing::info!(sensor = %sensor.describe(), "Releasing sensor");
        }
        tracing::info!("Sampler stopped");
    }

    /// one sampling cycle; returns the reading that was stored
    pub async fn cycle(&mut self) -> Result<Reading> {
        let mut sensor = self
            .sensor
            .take()
            .ok_or_else(|| anyhow!("sensor handle already released"))?;

        // ioctl is a blocking syscall, keep it off the async workers
        let (sensor, sample) = tokio::task::spawn_blocking(move || {
            let sample = sample_once(&mut sensor);
            (sensor, sample)
        })
        .await
        .map_err(|e| anyhow!("sensor task failed: {}", e))?;
        self.sensor = Some(sensor);

        self.current = self.current.apply(&sample);
        self.store.write(self.current).await;
        self.log_reading(&sample);
        Ok(self.current)
    }

    fn log_reading(&self, sample: &RawSample) {
        let r = &self.current;
        let failed_reads = sample.failures();
        let timestamp_ms = timestamp_ms();
        if self.show_data {
            tracing::info!(
                timestamp_ms,
                temperature_celsius = %format!("{:.2}", r.temperature_celsius),
                temperature_fahrenheit = %format!("{:.2}", r.temperature_fahrenheit),
                humidity_percent = %format!("{:.2}", r.humidity_percent),
                pressure_hpa = %format!("{:.2}", r.pressure_hpa),
                failed_reads,
                "Sampled sensor"
            );
        } else {
            tracing::debug!(
                timestamp_ms,
                temperature_celsius = r.temperature_celsius,
                temperature_fahrenheit = r.temperature_fahrenheit,
                humidity_percent = r.humidity_percent,
                pressure_hpa = r.pressure_hpa,
                failed_reads,
                "Sampled sensor"
            );
        }
    }
}
