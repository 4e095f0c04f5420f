//! ==============================================================================
//! gpio.rs - dht11 access through a python subprocess
//! ==============================================================================
//!
//! why subprocess to python?:
//!     dht11 sensors require precise bit-banging timing (~microseconds).
//!     pure rust in userspace is unreliable due to lack of real-time guarantees.
//!     adafruit_dht handles this correctly with retries and timing compensation.
//!
//! relationships:
//!     - used by: hal.rs (real Hal, feature = "hardware")
//!     - uses: python3/adafruit_dht
//!
//! ==============================================================================

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use crate::error::SensorReadError;

/// read dht11 temperature and humidity on a BCM pin
///
/// blocking; callers run it on the blocking pool. the python process is
/// killed if it is still running after `deadline`.
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub fn read_dht11(pin: u8, deadline: Duration) -> Result<(f64, f64), SensorReadError> {

    let script = format!(
        r#"
import sys
try:
    import adafruit_dht
    import board
    import json

    dht = adafruit_dht.DHT11(board.D{})

    try:
        t, h = dht.temperature, dht.humidity
        if t is not None and h is not None:
            print(json.dumps({{"t": t, "h": h}}))
        else:
            print("null")
    finally:
        dht.exit()
except RuntimeError as e:
    print(str(e), file=sys.stderr)
    sys.exit(2)
except Exception as e:
    print(str(e), file=sys.stderr)
    sys.exit(1)
"#,
        pin
    );

    let mut command = Command::new("python3");
    command.arg("-c").arg(&script);
    let output = run_with_deadline(command, deadline)?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(classify_driver_error(&stderr));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_sample(stdout.trim())
}

fn run_with_deadline(mut command: Command, deadline: Duration) -> Result<Output, SensorReadError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SensorReadError::Driver(format!("failed to run python3: {e}")))?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if started.elapsed() >= deadline => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SensorReadError::Timeout);
            }
            Ok(None) => std::thread::sleep(Duration::from_millis(20)),
            Err(e) => return Err(SensorReadError::Driver(format!("waiting on python3: {e}"))),
        }
    }

    // the sample is a single short line, well under the pipe buffer
    child
        .wait_with_output()
        .map_err(|e| SensorReadError::Driver(format!("reading python3 output: {e}")))
}

/// adafruit_dht reports transient failures as RuntimeError text
fn classify_driver_error(stderr: &str) -> SensorReadError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("checksum") {
        SensorReadError::Checksum
    } else if lower.contains("timed out") || lower.contains("full buffer") {
        SensorReadError::Timeout
    } else {
        SensorReadError::Driver(stderr.to_string())
    }
}

fn parse_sample(stdout: &str) -> Result<(f64, f64), SensorReadError> {
    if stdout == "null" || stdout.is_empty() {
        return Err(SensorReadError::Timeout);
    }

    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| SensorReadError::Driver(format!("json parse error: {e} (got: {stdout})")))?;

    let temp = parsed["t"]
        .as_f64()
        .ok_or_else(|| SensorReadError::Driver("missing temperature".to_string()))?;
    let humidity = parsed["h"]
        .as_f64()
        .ok_or_else(|| SensorReadError::Driver("missing humidity".to_string()))?;

    Ok((temp, humidity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample() {
        let (t, h) = parse_sample(r#"{"t": 12.0, "h": 81.0}"#).unwrap();
        assert_eq!(t, 12.0);
        assert_eq!(h, 81.0);
    }

    #[test]
    fn test_null_sample_is_timeout() {
        assert!(matches!(parse_sample("null"), Err(SensorReadError::Timeout)));
        assert!(matches!(parse_sample(""), Err(SensorReadError::Timeout)));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_driver_is_killed() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let result = run_with_deadline(command, Duration::from_millis(100));
        assert!(matches!(result, Err(SensorReadError::Timeout)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_finished_driver_output_is_kept() {
        let mut command = Command::new("echo");
        command.arg(r#"{"t": 3.0, "h": 90.0}"#);
        let output = run_with_deadline(command, Duration::from_secs(2)).unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(parse_sample(stdout.trim()).unwrap(), (3.0, 90.0));
    }

    #[test]
    fn test_classify_driver_error() {
        assert!(matches!(
            classify_driver_error("A full buffer was not returned. Try again."),
            SensorReadError::Timeout
        ));
        assert!(matches!(
            classify_driver_error("Checksum did not validate. Try again."),
            SensorReadError::Checksum
        ));
        assert!(matches!(classify_driver_error("No module named board"), SensorReadError::Driver(_)));
    }
}
