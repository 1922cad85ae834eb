//! Results persistence and aggregation
//!
//! Results files are append-only and line oriented, one `LABEL: value` per
//! line. Several runs may accumulate in one file; readers take the last value
//! seen for each label.

use crate::error::{BenchError, Result};
use crate::memory::MemoryReading;
use crate::runner::{MemoryOutcome, ScenarioOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Label of the line that opens each run
pub const RUN_STARTED_LABEL: &str = "RUN_STARTED";

/// Parsed value of one results line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResultValue {
    Samples(Vec<f64>),
    Mean(f64),
    Memory(Vec<MemoryReading>),
    Text(String),
}

/// Append-only writer for one results file
#[derive(Debug, Clone)]
pub struct ResultsRecorder {
    path: PathBuf,
}

impl ResultsRecorder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the file; only done when the caller asks for a fresh start
    pub fn clear(&self) -> Result<()> {
        fs::File::create(&self.path)?;
        info!(path = %self.path.display(), "Cleared results file");
        Ok(())
    }

    /// Mark the start of a run so accumulated runs stay distinguishable
    pub fn record_run_started(&self, at: DateTime<Utc>) -> Result<()> {
        self.append(RUN_STARTED_LABEL, &at.to_rfc3339())
    }

    /// Append the raw samples and their mean; returns the mean
    pub fn record_scenario(&self, label: &str, samples: &[f64]) -> Result<f64> {
        if samples.is_empty() {
            return Err(BenchError::EmptySamples(label.to_string()));
        }

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let mut lines = format_line(label, &format_samples(samples));
        lines.push_str(&format_line(&format!("{}_AVG", label), &format!("{:?}", mean)));
        self.write(&lines)?;

        debug!(label = %label, samples = samples.len(), mean_secs = mean, "Recorded scenario");
        Ok(mean)
    }

    pub fn record_outcome(&self, outcome: &ScenarioOutcome) -> Result<f64> {
        self.record_scenario(outcome.label(), &outcome.elapsed_seconds())
    }

    pub fn record_memory(&self, label: &str, readings: &[MemoryReading]) -> Result<()> {
        self.append(label, &format_memory(readings))
    }

    pub fn record_memory_outcome(&self, outcome: &MemoryOutcome) -> Result<()> {
        let lines: String = outcome
            .snapshots
            .iter()
            .map(|(label, readings)| format_line(label, &format_memory(readings)))
            .collect();
        self.write(&lines)
    }

    fn append(&self, label: &str, value: &str) -> Result<()> {
        self.write(&format_line(label, value))
    }

    fn write(&self, lines: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(lines.as_bytes())?;
        Ok(())
    }
}

fn format_line(label: &str, value: &str) -> String {
    format!("{}: {}\n", label, value)
}

fn format_samples(samples: &[f64]) -> String {
    let values: Vec<String> = samples.iter().map(|s| format!("{:?}", s)).collect();
    format!("[{}]", values.join(", "))
}

fn format_memory(readings: &[MemoryReading]) -> String {
    let values: Vec<String> = readings
        .iter()
        .map(|r| format!("('{}', {})", r.container, r.kib))
        .collect();
    format!("[{}]", values.join(", "))
}

/// Parse one results line into its label and value
///
/// Returns `None` for blank or malformed lines. An empty list parses as an
/// empty sample list.
pub fn parse_line(line: &str) -> Option<(String, ResultValue)> {
    let (label, value) = line.trim().split_once(": ")?;
    let label = label.trim();
    let value = value.trim();
    if label.is_empty() {
        return None;
    }

    let parsed = if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        let inner = inner.trim();
        if inner.starts_with('(') {
            ResultValue::Memory(parse_memory(inner)?)
        } else if inner.is_empty() {
            ResultValue::Samples(Vec::new())
        } else {
            ResultValue::Samples(
                inner
                    .split(',')
                    .map(|v| v.trim().parse::<f64>().ok())
                    .collect::<Option<Vec<_>>>()?,
            )
        }
    } else if let Ok(mean) = value.parse::<f64>() {
        ResultValue::Mean(mean)
    } else {
        ResultValue::Text(value.to_string())
    };

    Some((label.to_string(), parsed))
}

fn parse_memory(inner: &str) -> Option<Vec<MemoryReading>> {
    let mut readings = Vec::new();
    let mut rest = inner.trim();

    while !rest.is_empty() {
        let (body, tail) = rest.strip_prefix('(')?.split_once(')')?;
        let (name, kib) = body.rsplit_once(',')?;
        let name = name.trim().trim_matches(|c: char| c == '\'' || c == '"');
        readings.push(MemoryReading::new(name, kib.trim().parse().ok()?));
        rest = tail.trim_start().trim_start_matches(',').trim_start();
    }

    Some(readings)
}

/// Aggregated results: sample lists with their means, plus memory snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    scenarios: Vec<(String, Vec<f64>)>,
    memory: Vec<(String, Vec<MemoryReading>)>,
}

/// A warm scenario whose mean exceeds its cold counterpart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advisory {
    pub warm_label: String,
    pub warm_mean: f64,
    pub cold_label: String,
    pub cold_mean: f64,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a results file; later lines for the same label replace earlier ones
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    pub fn parse(content: &str) -> Self {
        let mut set = Self::new();
        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_line(line) {
                // Sample lists are never written empty, so `[]` is a memory snapshot
                Some((label, ResultValue::Samples(samples))) if samples.is_empty() => {
                    set.add_memory(&label, Vec::new())
                }
                Some((label, ResultValue::Samples(samples))) => set.add_samples(&label, samples),
                Some((label, ResultValue::Memory(readings))) => set.add_memory(&label, readings),
                // Means are recomputed from the samples
                Some((_, ResultValue::Mean(_))) | Some((_, ResultValue::Text(_))) => {}
                None => debug!(line = number + 1, "Skipping malformed results line"),
            }
        }
        set
    }

    pub fn add_outcome(&mut self, outcome: &ScenarioOutcome) {
        self.add_samples(outcome.label(), outcome.elapsed_seconds());
    }

    pub fn add_samples(&mut self, label: &str, samples: Vec<f64>) {
        match self.scenarios.iter_mut().find(|(l, _)| l == label) {
            Some(entry) => entry.1 = samples,
            None => self.scenarios.push((label.to_string(), samples)),
        }
    }

    pub fn add_memory(&mut self, label: &str, readings: Vec<MemoryReading>) {
        match self.memory.iter_mut().find(|(l, _)| l == label) {
            Some(entry) => entry.1 = readings,
            None => self.memory.push((label.to_string(), readings)),
        }
    }

    pub fn scenarios(&self) -> &[(String, Vec<f64>)] {
        &self.scenarios
    }

    pub fn memory(&self) -> &[(String, Vec<MemoryReading>)] {
        &self.memory
    }

    pub fn samples(&self, label: &str) -> Option<&[f64]> {
        self.scenarios
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| s.as_slice())
    }

    /// Arithmetic mean; `None` for unknown labels and empty sample lists
    pub fn mean(&self, label: &str) -> Option<f64> {
        let samples = self.samples(label)?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// Warm scenarios slower on average than the matching cold scenario
    pub fn advisories(&self) -> Vec<Advisory> {
        self.scenarios
            .iter()
            .filter_map(|(warm_label, _)| {
                let cold_label = warm_label.replacen("_WARM_", "_COLD_", 1);
                if &cold_label == warm_label {
                    return None;
                }
                let warm_mean = self.mean(warm_label)?;
                let cold_mean = self.mean(&cold_label)?;
                (warm_mean > cold_mean).then(|| Advisory {
                    warm_label: warm_label.clone(),
                    warm_mean,
                    cold_label,
                    cold_mean,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn recorder() -> (tempfile::TempDir, ResultsRecorder) {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ResultsRecorder::new(dir.path().join("start-up.txt"));
        (dir, recorder)
    }

    #[test]
    fn test_record_scenario_lines() {
        let (_dir, recorder) = recorder();

        let mean = recorder
            .record_scenario("LAMBDA_COLD_STARTUP", &[1.5, 2.5, 2.0])
            .unwrap();
        assert!((mean - 2.0).abs() < 1e-9);

        let content = fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(
            content,
            "LAMBDA_COLD_STARTUP: [1.5, 2.5, 2.0]\nLAMBDA_COLD_STARTUP_AVG: 2.0\n"
        );
    }

    #[test]
    fn test_empty_samples_are_rejected() {
        let (_dir, recorder) = recorder();
        let result = recorder.record_scenario("EPHEM_WARM_STARTUP", &[]);
        assert!(matches!(result, Err(BenchError::EmptySamples(_))));
        assert!(!recorder.path().exists());
    }

    #[test]
    fn test_record_memory_line() {
        let (_dir, recorder) = recorder();
        recorder
            .record_memory(
                "LAMBDA_POD_ATTACHED",
                &[MemoryReading::new("container", 412), MemoryReading::new("cntr", 9000)],
            )
            .unwrap();

        let content = fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(content, "LAMBDA_POD_ATTACHED: [('container', 412), ('cntr', 9000)]\n");
    }

    #[test]
    fn test_appends_across_runs_and_clear() {
        let (_dir, recorder) = recorder();
        recorder.record_scenario("A", &[1.0]).unwrap();
        recorder.record_scenario("A", &[3.0]).unwrap();

        let set = ResultSet::load(recorder.path()).unwrap();
        assert_eq!(set.samples("A"), Some(&[3.0][..]));
        assert_eq!(fs::read_to_string(recorder.path()).unwrap().lines().count(), 4);

        recorder.clear().unwrap();
        assert_eq!(fs::read_to_string(recorder.path()).unwrap(), "");
    }

    #[test]
    fn test_written_samples_read_back() {
        let (_dir, recorder) = recorder();
        let samples = [0.123456789, 1.0 / 3.0, 12.5];
        recorder.record_scenario("EPHEM_COLD_STARTUP", &samples).unwrap();

        let set = ResultSet::load(recorder.path()).unwrap();
        let read = set.samples("EPHEM_COLD_STARTUP").unwrap();
        assert_eq!(read.len(), samples.len());
        for (a, b) in read.iter().zip(samples.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_parse_line_variants() {
        assert_eq!(
            parse_line("X_AVG: 0.5"),
            Some(("X_AVG".to_string(), ResultValue::Mean(0.5)))
        );
        assert_eq!(
            parse_line("POD_IDLE: [('container', 412)]"),
            Some((
                "POD_IDLE".to_string(),
                ResultValue::Memory(vec![MemoryReading::new("container", 412)])
            ))
        );
        assert_eq!(
            parse_line("POD_IDLE: []"),
            Some(("POD_IDLE".to_string(), ResultValue::Samples(Vec::new())))
        );
        assert_eq!(
            parse_line("RUN_STARTED: 2026-01-01T00:00:00+00:00"),
            Some((
                "RUN_STARTED".to_string(),
                ResultValue::Text("2026-01-01T00:00:00+00:00".to_string())
            ))
        );
        assert_eq!(parse_line("garbage"), None);
        assert_eq!(parse_line("X: [1.0, nope]"), None);
    }

    #[test]
    fn test_run_header() {
        let (_dir, recorder) = recorder();
        let at = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        recorder.record_run_started(at).unwrap();

        let content = fs::read_to_string(recorder.path()).unwrap();
        assert_eq!(content, "RUN_STARTED: 2026-10-18T12:00:00+00:00\n");
    }

    #[test]
    fn test_advisories() {
        let mut set = ResultSet::new();
        set.add_samples("LAMBDA_COLD_STARTUP", vec![2.0, 2.0]);
        set.add_samples("LAMBDA_WARM_STARTUP", vec![0.5, 0.7]);
        set.add_samples("EPHEM_COLD_STARTUP", vec![1.0]);
        set.add_samples("EPHEM_WARM_STARTUP", vec![1.5]);

        let advisories = set.advisories();
        assert_eq!(advisories.len(), 1);
        assert_eq!(advisories[0].warm_label, "EPHEM_WARM_STARTUP");
        assert_eq!(advisories[0].cold_label, "EPHEM_COLD_STARTUP");
        assert!((set.mean("LAMBDA_WARM_STARTUP").unwrap() - 0.6).abs() < 1e-9);
    }
}
