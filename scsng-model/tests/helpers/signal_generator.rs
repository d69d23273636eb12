//! Synthetic trace generator
//!
//! Builds traces with a Gaussian S pulse at t = 0 and a smaller ScS pulse
//! later on, plus deterministic low-level noise, and writes them in the
//! trace store format.

use scsng_model::services::{TraceStore, PHASE_S, PHASE_SCS};
use scsng_model::{Signal, TraceMeta};
use std::path::Path;

/// Shape of a generated trace
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub delta: f64,
    pub begin: f64,
    pub duration: f64,
    /// S pulse width, seconds
    pub sigma: f64,
    /// ScS arrival after S, seconds
    pub scs_delay: f64,
    pub scs_amplitude: f64,
    pub noise_amplitude: f64,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            delta: 0.025,
            begin: -150.0,
            duration: 400.0,
            sigma: 2.0,
            scs_delay: 25.0,
            scs_amplitude: 0.6,
            noise_amplitude: 0.01,
        }
    }
}

fn pulse(t: f64, center: f64, sigma: f64) -> f64 {
    let x = (t - center) / sigma;
    (-0.5 * x * x).exp()
}

/// Generate one trace; `seed` varies the noise between stations
pub fn generate_trace(config: &TraceConfig, event: &str, station: &str, gcarc: f64, seed: u32) -> Signal {
    let n = (config.duration / config.delta) as usize;
    let phase = seed as f64 * 0.37;
    let amp = (0..n)
        .map(|i| {
            let t = config.begin + i as f64 * config.delta;
            let noise = config.noise_amplitude
                * ((0.9 * t + phase).sin() + 0.5 * (2.3 * t + 2.0 * phase).sin());
            pulse(t, 0.0, config.sigma)
                + config.scs_amplitude * pulse(t, config.scs_delay, config.sigma)
                + noise
        })
        .collect();

    let mut meta = TraceMeta {
        station: station.to_string(),
        event: event.to_string(),
        gcarc,
        depth: 500.0,
        ..Default::default()
    };
    meta.arrivals.insert(PHASE_S.to_string(), 0.0);
    meta.arrivals.insert(PHASE_SCS.to_string(), config.scs_delay);
    Signal::new(config.delta, config.begin, amp)
        .unwrap()
        .with_meta(meta)
}

/// Write `count` traces of one unit to `dir/<unit>/ST<nn>.trace`
pub fn write_unit(dir: &Path, unit: &str, count: usize, config: &TraceConfig) -> anyhow::Result<()> {
    for i in 0..count {
        let station = format!("ST{:02}", i + 1);
        let gcarc = 60.0 + i as f64;
        let trace = generate_trace(config, unit, &station, gcarc, i as u32);
        TraceStore::store(&dir.join(unit).join(format!("{}.trace", station)), &trace)?;
    }
    Ok(())
}
