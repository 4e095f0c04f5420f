//! dew point via the Magnus-Tetens approximation

const MAGNUS_A: f64 = 17.27;
const MAGNUS_B: f64 = 237.7;

/// dew point in celsius. humidity must be > 0; the sampler rejects anything else
pub fn compute(temperature_c: f64, humidity_pct: f64) -> f64 {
    let gamma = (MAGNUS_A * temperature_c) / (MAGNUS_B + temperature_c) + (humidity_pct / 100.0).ln();
    (MAGNUS_B * gamma) / (MAGNUS_A - gamma)
}
