//! Plain-text trace storage
//!
//! **Format:**
//! ```text
//! # delta = 0.025
//! # begin = -120
//! # station = ST01
//! # event = 201500000012
//! # gcarc = 67.5
//! # depth = 500
//! # tag = 0
//! # arrival.S = 0
//! # arrival.ScS = 12.4
//! 0.0012
//! 0.0013
//! ...
//! ```
//!
//! Header lines are `# key = value`; everything else is one amplitude per
//! line. Unknown header keys are ignored. Floats are written in Rust's
//! shortest round-trip form.

use crate::error::{ModelError, Result};
use crate::signal::{Signal, TraceMeta};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const ARRIVAL_PREFIX: &str = "arrival.";

/// Trace file reader and writer
pub struct TraceStore;

impl TraceStore {
    /// Read one trace; the file path is recorded in the metadata
    pub fn load(path: &Path) -> Result<Signal> {
        let content = fs::read_to_string(path)?;
        let mut signal = parse(&content).map_err(|e| match e {
            ModelError::Parse(msg) => ModelError::Parse(format!("{}: {}", path.display(), msg)),
            other => other,
        })?;
        signal.meta_mut().file = Some(path.to_path_buf());
        Ok(signal)
    }

    /// Write one trace, creating parent directories
    pub fn store(path: &Path, signal: &Signal) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, render(signal))?;
        debug!(path = %path.display(), samples = signal.len(), "trace stored");
        Ok(())
    }

    /// Every trace with `extension` directly inside `dir`, sorted by file name
    pub fn load_dir(dir: &Path, extension: &str) -> Result<Vec<Signal>> {
        let mut files: Vec<PathBuf> = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if entry.file_type().is_file()
                        && path.extension().and_then(|e| e.to_str()) == Some(extension)
                    {
                        files.push(path.to_path_buf());
                    }
                }
                Err(e) => {
                    if e.depth() == 0 {
                        return Err(ModelError::Io(std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            format!("{}: {}", dir.display(), e),
                        )));
                    }
                    warn!("Error accessing entry: {}", e);
                }
            }
        }
        files.sort();
        files.iter().map(|f| Self::load(f)).collect()
    }

    /// Names of the sub-directories of `dir`, sorted
    pub fn list_units(dir: &Path) -> Result<Vec<String>> {
        let mut units = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                ModelError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{}: {}", dir.display(), e),
                ))
            })?;
            if entry.file_type().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    units.push(name.to_string());
                }
            }
        }
        units.sort();
        Ok(units)
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .map_err(|e| ModelError::Parse(format!("header '{}' value '{}': {}", key, value, e)))
}

fn parse(content: &str) -> Result<Signal> {
    let mut delta = None;
    let mut begin = 0.0;
    let mut tag = 0;
    let mut meta = TraceMeta::default();
    let mut amp = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(header) = line.strip_prefix('#') {
            let Some((key, value)) = header.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());
            match key {
                "delta" => delta = Some(parse_f64(key, value)?),
                "begin" => begin = parse_f64(key, value)?,
                "station" => meta.station = value.to_string(),
                "event" => meta.event = value.to_string(),
                "gcarc" => meta.gcarc = parse_f64(key, value)?,
                "depth" => meta.depth = parse_f64(key, value)?,
                "tag" => {
                    tag = value.parse::<i32>().map_err(|e| {
                        ModelError::Parse(format!("header 'tag' value '{}': {}", value, e))
                    })?
                }
                _ => {
                    if let Some(phase) = key.strip_prefix(ARRIVAL_PREFIX) {
                        meta.arrivals.insert(phase.to_string(), parse_f64(key, value)?);
                    }
                }
            }
            continue;
        }
        let value = line.parse::<f64>().map_err(|e| {
            ModelError::Parse(format!("line {} '{}': {}", line_no + 1, line, e))
        })?;
        amp.push(value);
    }

    let delta = delta.ok_or_else(|| ModelError::Parse("missing 'delta' header".to_string()))?;
    let mut signal = Signal::new(delta, begin, amp)?.with_meta(meta);
    signal.set_tag(tag);
    Ok(signal)
}

fn render(signal: &Signal) -> String {
    let meta = signal.meta();
    let mut out = String::with_capacity(signal.len() * 12 + 256);
    // Writing to a String cannot fail
    let _ = writeln!(out, "# delta = {}", signal.delta());
    let _ = writeln!(out, "# begin = {}", signal.begin_time());
    if !meta.station.is_empty() {
        let _ = writeln!(out, "# station = {}", meta.station);
    }
    if !meta.event.is_empty() {
        let _ = writeln!(out, "# event = {}", meta.event);
    }
    let _ = writeln!(out, "# gcarc = {}", meta.gcarc);
    let _ = writeln!(out, "# depth = {}", meta.depth);
    let _ = writeln!(out, "# tag = {}", signal.tag());
    for (phase, time) in &meta.arrivals {
        let _ = writeln!(out, "# {}{} = {}", ARRIVAL_PREFIX, phase, time);
    }
    for v in signal.amp() {
        let _ = writeln!(out, "{}", v);
    }
    out
}
