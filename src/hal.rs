//! ==============================================================================
//! hal.rs - sensor hardware abstraction
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for reading the environmental sensor.
//!     abstracts away the difference between running against the real
//!     character device (ioctl register reads) and a development machine
//!     (mock values).
//!
//! relationships:
//!     - used by: sampler.rs (the only owner of a sensor handle)
//!     - opened by: supervisor.rs (during startup, so open errors are fatal)
//!     - uses: libc (ioctl on the device file descriptor)
//!
//! ==============================================================================

use crate::config::{SensorBackend, SensorConfig};
use std::fmt;
use std::path::PathBuf;

/// the three registers exposed by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Temperature,
    Humidity,
    Pressure,
}

impl Register {
    /// ioctl command number for this register (`_IOR('B', n, int)`)
    fn command_number(self) -> u8 {
        match self {
            Register::Temperature => 1,
            Register::Humidity => 2,
            Register::Pressure => 3,
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Register::Temperature => "temperature",
            Register::Humidity => "humidity",
            Register::Pressure => "pressure",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("failed to open sensor device {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read {register} register: {source}")]
    Read {
        register: Register,
        #[source]
        source: std::io::Error,
    },
    #[error("device sensor backend is only available on linux")]
    Unsupported,
}

/// raw register access; every read may fail independently
pub trait SensorSource: Send {
    fn read_register(&mut self, register: Register) -> Result<i32, SensorError>;

    fn read_temperature(&mut self) -> Result<i32, SensorError> {
        self.read_register(Register::Temperature)
    }

    fn read_humidity(&mut self) -> Result<i32, SensorError> {
        self.read_register(Register::Humidity)
    }

    fn read_pressure(&mut self) -> Result<i32, SensorError> {
        self.read_register(Register::Pressure)
    }

    /// short label for logs
    fn describe(&self) -> String;
}

impl SensorSource for Box<dyn SensorSource> {
    fn read_register(&mut self, register: Register) -> Result<i32, SensorError> {
        (**self).read_register(register)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// open the backend selected in the configuration
pub fn open(config: &SensorConfig) -> Result<Box<dyn SensorSource>, SensorError> {
    match config.backend {
        SensorBackend::Device => Ok(Box::new(DeviceSensor::open(config.device_path.clone())?)),
        SensorBackend::Mock => Ok(Box::new(MockSensor::new())),
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For machines without the device)
// ==============================================================================================

/// fixed plausible values: 25.00 C, 50.00 %, 1013.25 hPa
pub struct MockSensor {}

impl MockSensor {
    pub fn new() -> Self {
        tracing::info!("Using MOCK sensor (no hardware access)");
        Self {}
    }
}

impl SensorSource for MockSensor {
    fn read_register(&mut self, register: Register) -> Result<i32, SensorError> {
        tracing::debug!("[MOCK SENSOR] Reading {} register", register);
        Ok(match register {
            Register::Temperature => 2500,
            Register::Humidity => 51200,
            Register::Pressure => 101325,
        })
    }

    fn describe(&self) -> String {
        "mock".to_string()
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (character device + ioctl)
// ==============================================================================================

pub struct DeviceSensor {
    path: PathBuf,
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    file: std::fs::File,
}

impl DeviceSensor {
    /// open the device read-only; the handle lives as long as the sensor
    pub fn open(path: PathBuf) -> Result<Self, SensorError> {
        if !cfg!(target_os = "linux") {
            return Err(SensorError::Unsupported);
        }
        let file = std::fs::File::open(&path).map_err(|source| SensorError::Open {
            path: path.clone(),
            source,
        })?;
        tracing::info!("Opened sensor device {}", path.display());
        Ok(Self { path, file })
    }
}

/// `_IOR(ty, nr, int)` as laid out by the generic linux ioctl encoding
#[cfg(target_os = "linux")]
const fn ior_int(ty: u8, nr: u8) -> u32 {
    const IOC_READ: u32 = 2;
    let size = std::mem::size_of::<libc::c_int>() as u32;
    (IOC_READ << 30) | (size << 16) | ((ty as u32) << 8) | nr as u32
}

#[cfg(target_os = "linux")]
impl SensorSource for DeviceSensor {
    fn read_register(&mut self, register: Register) -> Result<i32, SensorError> {
        use std::os::fd::AsRawFd;

        let request = ior_int(b'B', register.command_number());
        let mut value: libc::c_int = 0;
        // SAFETY: the fd is owned by self.file and stays open for the call;
        // the driver writes exactly one c_int through the pointer.
        let rc = unsafe { libc::ioctl(self.file.as_raw_fd(), request as _, &mut value as *mut libc::c_int) };
        if rc < 0 {
            return Err(SensorError::Read {
                register,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(value)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[cfg(not(target_os = "linux"))]
impl SensorSource for DeviceSensor {
    fn read_register(&mut self, _register: Register) -> Result<i32, SensorError> {
        Err(SensorError::Unsupported)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for DeviceSensor {
    fn drop(&mut self) {
        tracing::info!("Closed sensor device {}", self.path.display());
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_sensor_values() {
        let mut sensor = MockSensor::new();
        assert_eq!(sensor.read_temperature().unwrap(), 2500);
        assert_eq!(sensor.read_humidity().unwrap(), 51200);
        assert_eq!(sensor.read_pressure().unwrap(), 101325);
    }

    #[test]
    fn test_open_missing_device_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = SensorConfig {
            backend: SensorBackend::Device,
            device_path: dir.path().join("no-such-sensor"),
        };
        assert!(open(&config).is_err());
    }

    #[test]
    fn test_open_mock_backend() {
        let config = SensorConfig {
            backend: SensorBackend::Mock,
            device_path: PathBuf::from("/dev/null"),
        };
        let sensor = open(&config).unwrap();
        assert_eq!(sensor.describe(), "mock");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ioctl_encoding() {
        // _IOR('B', 1, int) on x86/arm linux
        assert_eq!(ior_int(b'B', 1), 0x8004_4201);
        assert_eq!(ior_int(b'B', 3), 0x8004_4203);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ioctl_on_regular_file_is_read_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut sensor = DeviceSensor::open(file.path().to_path_buf()).unwrap();
        match sensor.read_humidity() {
            Err(SensorError::Read { register, .. }) => assert_eq!(register, Register::Humidity),
            other => panic!("expected read error, got {:?}", other),
        }
    }
}
