//! ==============================================================================
//! supervisor.rs - lifecycle and graceful shutdown
//! ==============================================================================
//!
//! purpose:
//!     wires the sensor, the sampler and the metrics server together and
//!     drives the lifecycle:
//!
//!         Starting -> Running -> ShuttingDown -> Stopped
//!
//!     - Starting: open the sensor, bind the listener, write the pid file.
//!       any failure here is fatal and nothing has been spawned yet.
//!     - Running: sampler and server run as two independent tasks.
//!     - ShuttingDown: one cancellation token stops both. the server drains
//!       in-flight requests, the sampler wakes from its sleep and releases
//!       the sensor.
//!     - Stopped: both tasks joined, pid file removed.
//!
//! relationships:
//!     - uses: hal.rs, sampler.rs, exporter.rs, store.rs, lifecycle.rs
//!     - used by: main.rs
//!
//! ==============================================================================

use crate::config::ExporterConfig;
use crate::exporter;
use crate::hal::{self, SensorSource};
use crate::lifecycle::PidFile;
use crate::sampler::Sampler;
use crate::store::ReadingsStore;

use anyhow::{anyhow, Context, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Starting = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => RunState::Starting,
            1 => RunState::Running,
            2 => RunState::ShuttingDown,
            _ => RunState::Stopped,
        }
    }
}

/// shared lifecycle state plus the cancellation token it controls
#[derive(Clone)]
pub struct ShutdownHandle {
    state: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl ShutdownHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RunState::Starting as u8)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn transition(&self, from: RunState, to: RunState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// move to ShuttingDown and cancel both units
    ///
    /// returns false when shutdown was already requested; the repeated call
    /// does nothing.
    pub fn request(&self, reason: &str) -> bool {
        let won = self.transition(RunState::Running, RunState::ShuttingDown)
            || self.transition(RunState::Starting, RunState::ShuttingDown);
        if won {
            tracing::info!(reason, "Shutting down");
            self.cancel.cancel();
        } else {
            tracing::debug!(reason, state = ?self.state(), "Shutdown already in progress");
        }
        won
    }
}

pub struct Supervisor {
    config: ExporterConfig,
    sensor: Box<dyn SensorSource>,
    listener: TcpListener,
    pid_file: Option<PidFile>,
    signals: Signals,
    store: ReadingsStore,
    shutdown: ShutdownHandle,
}

impl Supervisor {
    /// Starting phase against the configured sensor backend
    pub async fn start(config: ExporterConfig) -> Result<Self> {
        let sensor = hal::open(&config.sensor).context("Failed to open sensor")?;
        Self::start_with_sensor(config, sensor).await
    }

    /// Starting phase with an already opened sensor
    pub async fn start_with_sensor(config: ExporterConfig, sensor: Box<dyn SensorSource>) -> Result<Self> {
        let shutdown = ShutdownHandle::new();

        // from here on a termination signal is queued for the watcher
        // instead of killing the process with the pid file in place
        let signals = Signals::register().context("Failed to install signal handlers")?;

        let addr = config.server.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {}", addr))?;

        let pid_file = match &config.lifecycle.pid_file {
            Some(path) => Some(PidFile::create(path)?),
            None => None,
        };

        tracing::info!(sensor = %sensor.describe(), "Sensor ready");

        Ok(Self {
            config,
            sensor,
            listener,
            pid_file,
            signals,
            store: ReadingsStore::new(),
            shutdown,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn store(&self) -> ReadingsStore {
        self.store.clone()
    }

    /// Running until a termination signal (or a unit failure), then tear down
    pub async fn run(self) -> Result<()> {
        let local_addr = self.local_addr()?;
        let Supervisor {
            config,
            sensor,
            listener,
            pid_file,
            signals,
            store,
            shutdown,
        } = self;

        if !shutdown.transition(RunState::Starting, RunState::Running) {
            // shutdown was requested before anything was spawned
            if let Some(pid_file) = pid_file {
                pid_file.remove();
            }
            shutdown.state.store(RunState::Stopped as u8, Ordering::SeqCst);
            tracing::info!("Stopped before running");
            return Ok(());
        }
        let cancel = shutdown.token();

        // 1. sampler task
        let sampler = Sampler::new(
            sensor,
            store.clone(),
            config.polling.interval(),
            config.logging.show_sensor_data,
        );
        let sampler_task = {
            let shutdown = shutdown.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                sampler.run(cancel).await;
                // true only if the sampler ended on its own
                shutdown.request("sampler stopped")
            })
        };

        // 2. metrics server task
        let app = exporter::router(store, &config.server.metrics_path);
        tracing::info!(
            "Metrics live at http://{}{}",
            local_addr,
            config.server.metrics_path
        );
        let server_task = {
            let shutdown = shutdown.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let result = axum::serve(listener, app)
                    .with_graceful_shutdown(async move { cancel.cancelled().await })
                    .await;
                let unexpected = shutdown.request("metrics server stopped");
                (result, unexpected)
            })
        };

        // 3. signal watcher
        let signal_task = tokio::spawn(watch_signals(signals, shutdown.clone()));

        tracing::info!("Running");
        let (sampler_result, server_result) = tokio::join!(sampler_task, server_task);
        signal_task.abort();

        // Stopped
        if let Some(pid_file) = pid_file {
            pid_file.remove();
        }
        shutdown.state.store(RunState::Stopped as u8, Ordering::SeqCst);
        tracing::info!("Stopped");

        let sampler_unexpected = sampler_result.context("sampler task panicked")?;
        let (serve_result, server_unexpected) = server_result.context("metrics server task panicked")?;
        serve_result.context("metrics server failed")?;
        if server_unexpected {
            return Err(anyhow!("metrics server stopped unexpectedly"));
        }
        if sampler_unexpected {
            return Err(anyhow!("sampler stopped unexpectedly"));
        }
        Ok(())
    }
}

/// termination signal streams, registered during Starting
struct Signals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl Signals {
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    fn register() -> std::io::Result<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::select! {
            r = self.interrupt.recv() => r.map(|_| "SIGINT"),
            r = self.terminate.recv() => r.map(|_| "SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) -> Option<&'static str> {
        tokio::signal::ctrl_c().await.ok().map(|_| "ctrl-c")
    }
}

/// request shutdown on every SIGINT/SIGTERM; repeats are ignored
async fn watch_signals(mut signals: Signals, shutdown: ShutdownHandle) {
    while let Some(signal) = signals.recv().await {
        if !shutdown.request(signal) {
            tracing::warn!(signal, "Shutdown already in progress, ignoring signal");
        }
    }
    tracing::error!("Signal streams closed, no longer listening for termination");
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SensorBackend, SensorConfig};
    use crate::sampler::tests::ScriptedSensor;
    use std::time::{Duration, Instant};

    /// tests that run the full supervisor share the process signal handlers
    static LIFECYCLE_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn lifecycle_guard() -> std::sync::MutexGuard<'static, ()> {
        LIFECYCLE_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn test_config(pid_file: Option<std::path::PathBuf>) -> ExporterConfig {
        let mut config = ExporterConfig::default();
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 0;
        config.polling.interval_seconds = 3600;
        config.logging.show_sensor_data = false;
        config.lifecycle.pid_file = pid_file;
        config
    }

    #[test]
    fn test_request_is_idempotent() {
        let handle = ShutdownHandle::new();
        assert!(handle.transition(RunState::Starting, RunState::Running));

        assert!(handle.request("first"));
        assert_eq!(handle.state(), RunState::ShuttingDown);
        assert!(handle.token().is_cancelled());

        assert!(!handle.request("second"));
        assert_eq!(handle.state(), RunState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_missing_device_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(Some(dir.path().join("envmon.pid")));
        config.sensor = SensorConfig {
            backend: SensorBackend::Device,
            device_path: dir.path().join("no-such-sensor"),
        };

        assert!(Supervisor::start(config).await.is_err());
        // nothing was started, so no pid file either
        assert!(!dir.path().join("envmon.pid").exists());
    }

    #[tokio::test]
    async fn test_bind_failure_is_fatal() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = test_config(None);
        config.server.port = taken.local_addr().unwrap().port();

        let sensor = Box::new(ScriptedSensor::steady(2500, 51200, 10132));
        let err = Supervisor::start_with_sensor(config, sensor).await.err().unwrap();
        assert!(format!("{:#}", err).contains("bind"));
    }

    #[tokio::test]
    async fn test_shutdown_before_run_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("envmon.pid");
        let sensor = Box::new(ScriptedSensor::steady(2500, 51200, 10132));
        let reads = sensor.reads.clone();

        let supervisor = Supervisor::start_with_sensor(test_config(Some(pid_path.clone())), sensor)
            .await
            .unwrap();
        let handle = supervisor.shutdown_handle();
        assert!(handle.request("early"));

        supervisor.run().await.unwrap();
        assert_eq!(handle.state(), RunState::Stopped);
        assert!(!pid_path.exists());
        assert_eq!(reads.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_during_starting_stops_cleanly() {
        let _guard = lifecycle_guard();
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("envmon.pid");
        let sensor = Box::new(ScriptedSensor::steady(2500, 51200, 10132));

        let supervisor = Supervisor::start_with_sensor(test_config(Some(pid_path.clone())), sensor)
            .await
            .unwrap();
        let handle = supervisor.shutdown_handle();
        assert!(pid_path.exists());

        // delivered before any task is running; the handlers are already in place
        // SAFETY: plain kill(2) on our own pid
        assert_eq!(unsafe { libc::kill(libc::getpid(), libc::SIGTERM) }, 0);

        tokio::time::timeout(Duration::from_secs(2), supervisor.run())
            .await
            .expect("queued SIGTERM should stop the supervisor")
            .unwrap();
        assert_eq!(handle.state(), RunState::Stopped);
        assert!(!pid_path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_lifecycle() {
        let _guard = lifecycle_guard();
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("envmon.pid");
        let config = test_config(Some(pid_path.clone()));

        let sensor = Box::new(ScriptedSensor::steady(2500, 51200, 10132));
        let supervisor = Supervisor::start_with_sensor(config, sensor).await.unwrap();
        let addr = supervisor.local_addr().unwrap();
        let handle = supervisor.shutdown_handle();
        let store = supervisor.store();
        assert!(pid_path.exists());

        let run = tokio::spawn(supervisor.run());

        // the first cycle runs immediately
        let deadline = Instant::now() + Duration::from_secs(5);
        while store.read().await.temperature_celsius == 0.0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.state(), RunState::Running);

        let body = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("temperature_celsius 25.00\n"));
        assert!(body.contains("humidity_percentage 50.00\n"));

        // sampler is asleep for an hour; shutdown must not wait for it
        let started = Instant::now();
        assert!(handle.request("test"));
        assert!(!handle.request("test again"));
        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("shutdown should complete promptly")
            .unwrap()
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(handle.state(), RunState::Stopped);
        assert!(!pid_path.exists());
        assert!(reqwest::get(format!("http://{}/metrics", addr)).await.is_err());
    }
}
