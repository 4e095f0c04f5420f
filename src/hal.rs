//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     the two hardware collaborators of the control loop: the enclosure sensor
//!     and the heater relay. abstracts away the difference between running on a
//!     real Raspberry Pi (using `rppal`) and a development machine (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": The host should compile on Windows/Mac/Linux.
//!     - both traits are blocking; the control loop calls them on the blocking pool.
//!
//! relationships:
//!     - used by: controller.rs, sampler.rs
//!     - uses: rppal (on feature="hardware")
//!     - uses: gpio.rs (python DHT11 driver)
//!
//! ==============================================================================

use std::time::Duration;

use crate::error::{HardwareWriteError, SensorReadError};

pub trait Sensor: Send + Sync {
    /// raw (temperature_c, humidity_pct)
    fn read(&self) -> Result<(f64, f64), SensorReadError>;
}

pub trait Relay: Send + Sync {
    fn set(&self, on: bool) -> Result<(), HardwareWriteError>;
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For WSL / Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
pub use mock::{Dht11, RelayPin};

#[cfg(not(feature = "hardware"))]
mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    /// simulated sensor: a cold, damp night that slowly drifts
    pub struct Dht11 {
        pin: u8,
        step: AtomicU32,
    }

    impl Dht11 {
        pub fn new(pin: u8, _read_timeout: Duration) -> Self {
            tracing::info!("Using MOCK HAL (No hardware access)");
            Self { pin, step: AtomicU32::new(0) }
        }
    }

    impl Sensor for Dht11 {
        fn read(&self) -> Result<(f64, f64), SensorReadError> {
            let step = self.step.fetch_add(1, Ordering::Relaxed);
            let phase = f64::from(step % 120) / 120.0 * std::f64::consts::TAU;
            let temp = 8.0 + 2.0 * phase.sin();
            let humidity = 78.0 + 8.0 * phase.cos();
            tracing::debug!("[MOCK DHT11] pin {} -> {:.1}C {:.1}%", self.pin, temp, humidity);
            Ok((temp, humidity))
        }
    }

    pub struct RelayPin {
        pin: u8,
        state: AtomicBool,
    }

    impl RelayPin {
        pub fn new(pin: u8, _active_high: bool) -> Result<Self, HardwareWriteError> {
            Ok(Self { pin, state: AtomicBool::new(false) })
        }

        #[allow(dead_code)]
        pub fn is_on(&self) -> bool {
            self.state.load(Ordering::SeqCst)
        }
    }

    impl Relay for RelayPin {
        fn set(&self, on: bool) -> Result<(), HardwareWriteError> {
            tracing::debug!("[MOCK RELAY] Pin {} set to {}", self.pin, if on { "ON" } else { "OFF" });
            self.state.store(on, Ordering::SeqCst);
            Ok(())
        }
    }
}

// ==============================================================================================
// REAL IMPLEMENTATION (For Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
pub use real::{Dht11, RelayPin};

#[cfg(feature = "hardware")]
mod real {
    use super::*;
    use rppal::gpio::{Gpio, OutputPin};
    use std::sync::Mutex;

    pub struct Dht11 {
        pin: u8,
        read_timeout: Duration,
    }

    impl Dht11 {
        pub fn new(pin: u8, read_timeout: Duration) -> Self {
            tracing::info!("Using REAL HARDWARE HAL (rppal)");
            Self { pin, read_timeout }
        }
    }

    impl Sensor for Dht11 {
        fn read(&self) -> Result<(f64, f64), SensorReadError> {
            crate::gpio::read_dht11(self.pin, self.read_timeout)
        }
    }

    /// relay output held open for the process lifetime
    pub struct RelayPin {
        pin: u8,
        active_high: bool,
        output: Mutex<OutputPin>,
    }

    impl RelayPin {
        pub fn new(pin: u8, active_high: bool) -> Result<Self, HardwareWriteError> {
            let err = |e: rppal::gpio::Error| HardwareWriteError { pin, message: e.to_string() };
            let gpio = Gpio::new().map_err(err)?;
            let mut output = gpio.get(pin).map_err(err)?.into_output();
            // leave the pin where we put it if the process dies
            output.set_reset_on_drop(false);
            Ok(Self { pin, active_high, output: Mutex::new(output) })
        }
    }

    impl Relay for RelayPin {
        fn set(&self, on: bool) -> Result<(), HardwareWriteError> {
            let mut output = self.output.lock().map_err(|_| HardwareWriteError {
                pin: self.pin,
                message: "relay pin lock poisoned".to_string(),
            })?;
            if on == self.active_high {
                output.set_high();
            } else {
                output.set_low();
            }
            Ok(())
        }
    }
}

#[cfg(all(test, not(feature = "hardware")))]
mod tests {
    use super::*;

    #[test]
    fn test_mock_sensor_stays_plausible() {
        let sensor = Dht11::new(16, Duration::from_secs(5));
        for _ in 0..200 {
            let (t, h) = sensor.read().unwrap();
            assert!((-40.0..=80.0).contains(&t));
            assert!(h > 0.0 && h <= 100.0);
        }
    }

    #[test]
    fn test_mock_relay_tracks_state() {
        let relay = RelayPin::new(26, true).unwrap();
        relay.set(true).unwrap();
        assert!(relay.is_on());
        relay.set(false).unwrap();
        assert!(!relay.is_on());
    }
}
