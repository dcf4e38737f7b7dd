//! ==============================================================================
//! domain.rs - readings and unit conversion
//! ==============================================================================
//!
//! purpose:
//!     the value types that flow from the sensor to the metrics endpoint.
//!     raw register values come in as integers, physical units go out.
//!
//! relationships:
//!     - produced by: sampler.rs (one RawSample per cycle)
//!     - stored in: store.rs (the latest Reading)
//!     - rendered by: exporter.rs
//!
//! ==============================================================================

/// raw register divisor for temperature (centi-degrees celsius)
pub const TEMPERATURE_DIVISOR: f64 = 100.0;
/// raw register divisor for humidity (1/1024 %RH)
pub const HUMIDITY_DIVISOR: f64 = 1024.0;
/// raw register divisor for pressure (pascal -> hPa)
pub const PRESSURE_DIVISOR: f64 = 100.0;

/// one snapshot of converted sensor values
///
/// the all-zero default stands for "never sampled".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub temperature_celsius: f64,
    pub temperature_fahrenheit: f64,
    pub humidity_percent: f64,
    pub pressure_hpa: f64,
}

/// raw register values of one sampling cycle
///
/// `None` means that register read failed this cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawSample {
    pub temperature: Option<i32>,
    pub humidity: Option<i32>,
    pub pressure: Option<i32>,
}

impl RawSample {
    /// number of registers that failed to read
    pub fn failures(&self) -> usize {
        [self.temperature.is_none(), self.humidity.is_none(), self.pressure.is_none()]
            .iter()
            .filter(|failed| **failed)
            .count()
    }
}

pub fn celsius_from_raw(raw: i32) -> f64 {
    f64::from(raw) / TEMPERATURE_DIVISOR
}

pub fn fahrenheit_from_celsius(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn humidity_from_raw(raw: i32) -> f64 {
    f64::from(raw) / HUMIDITY_DIVISOR
}

pub fn pressure_from_raw(raw: i32) -> f64 {
    f64::from(raw) / PRESSURE_DIVISOR
}

impl Reading {
    /// build the next reading from a raw sample
    ///
    /// registers that failed keep the value from `self`, so a flaky humidity
    /// read never wipes out a good temperature.
    pub fn apply(&self, sample: &RawSample) -> Reading {
        let mut next = *self;
        if let Some(raw) = sample.temperature {
            next.temperature_celsius = celsius_from_raw(raw);
            next.temperature_fahrenheit = fahrenheit_from_celsius(next.temperature_celsius);
        }
        if let Some(raw) = sample.humidity {
            next.humidity_percent = humidity_from_raw(raw);
        }
        if let Some(raw) = sample.pressure {
            next.pressure_hpa = pressure_from_raw(raw);
        }
        next
    }
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_unit_conversions() {
        let sample = RawSample {
            temperature: Some(2500),
            humidity: Some(51200),
            pressure: Some(10132),
        };
        let reading = Reading::default().apply(&sample);

        assert!(approx(reading.temperature_celsius, 25.0));
        assert!(approx(reading.temperature_fahrenheit, 77.0));
        assert!(approx(reading.humidity_percent, 50.0));
        assert!(approx(reading.pressure_hpa, 101.32));
    }

    #[test]
    fn test_humidity_register_is_1024ths_of_a_percent() {
        assert!(approx(humidity_from_raw(51200), 50.0));
        assert!(approx(humidity_from_raw(512), 0.5));
        assert!(approx(humidity_from_raw(102400), 100.0));
    }

    #[test]
    fn test_negative_temperature() {
        assert!(approx(celsius_from_raw(-4000), -40.0));
        assert!(approx(fahrenheit_from_celsius(-40.0), -40.0));
    }

    #[test]
    fn test_failed_register_keeps_previous_value() {
        let previous = Reading {
            temperature_celsius: 20.0,
            temperature_fahrenheit: 68.0,
            humidity_percent: 40.0,
            pressure_hpa: 1000.0,
        };
        let sample = RawSample {
            temperature: Some(2500),
            humidity: None,
            pressure: Some(10132),
        };

        let next = previous.apply(&sample);
        assert!(approx(next.temperature_celsius, 25.0));
        assert!(approx(next.temperature_fahrenheit, 77.0));
        assert!(approx(next.humidity_percent, 40.0));
        assert!(approx(next.pressure_hpa, 101.32));
        assert_eq!(sample.failures(), 1);
    }

    #[test]
    fn test_all_failed_is_unchanged() {
        let previous = Reading {
            temperature_celsius: 1.0,
            temperature_fahrenheit: 33.8,
            humidity_percent: 2.0,
            pressure_hpa: 3.0,
        };
        let sample = RawSample::default();
        assert_eq!(previous.apply(&sample), previous);
        assert_eq!(sample.failures(), 3);
    }
}
