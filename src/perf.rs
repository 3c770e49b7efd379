use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde_json::json;

#[derive(Clone)]
pub(crate) struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
    count_totals: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
                count_totals: HashMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, name: &str, execution: Option<u64>, ms: f64) {
        let event = json!({
            "type": "perf.span",
            "name": name,
            "execution": execution,
            "unit": "ms",
            "ms": (ms * 1000.0).round() / 1000.0,
        });
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{event}");
        }
    }

    pub fn log_counts(&self, name: &str, execution: Option<u64>, counts: &[(&str, u64)]) {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(key, value)| (key.to_string(), json!(value)))
            .collect();
        let event = json!({
            "type": "perf.counts",
            "name": name,
            "execution": execution,
            "counts": map,
        });
        if let Ok(mut state) = self.inner.lock() {
            for (key, value) in counts {
                let full_key = format!("{name}.{key}");
                let entry = state.count_totals.entry(full_key).or_insert(0);
                *entry = entry.saturating_add(*value);
            }
            let _ = writeln!(state.writer, "{event}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

/// Times a named span and reports it on drop.
pub(crate) struct PerfSpan<'a> {
    logger: Option<&'a PerfLogger>,
    name: &'static str,
    execution: Option<u64>,
    start: Instant,
}

impl<'a> PerfSpan<'a> {
    pub fn start(logger: Option<&'a PerfLogger>, name: &'static str, execution: Option<u64>) -> Self {
        Self {
            logger,
            name,
            execution,
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for PerfSpan<'_> {
    fn drop(&mut self) {
        if let Some(logger) = self.logger {
            logger.log_span_ms(self.name, self.execution, self.elapsed_ms());
        }
    }
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let hot_path = hot_path_for(&self.path);
        let Ok(file) = File::create(&hot_path) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.total_cmp(a.1));
        for (rank, (name, ms)) in spans.into_iter().take(100).enumerate() {
            let count = *self.span_counts.get(name).unwrap_or(&1);
            let avg = if count == 0 { 0.0 } else { ms / count as f64 };
            let event = json!({
                "type": "perf.hot.span",
                "rank": rank + 1,
                "name": name,
                "unit": "ms",
                "agg": "sum",
                "ms": ms,
                "count": count,
                "avg_ms": avg,
            });
            let _ = writeln!(writer, "{event}");
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (rank, (name, value)) in counts.into_iter().take(100).enumerate() {
            let event = json!({
                "type": "perf.hot.count",
                "rank": rank + 1,
                "name": name,
                "value": value,
            });
            let _ = writeln!(writer, "{event}");
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("rdlflow_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hot_log_is_written_when_last_handle_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.log");
        {
            let logger = PerfLogger::new(&path).unwrap();
            logger.log_span_ms("paginate", Some(1), 2.5);
            logger.log_counts("paginate", Some(1), &[("pages", 3)]);
            let clone = logger.clone();
            drop(logger);
            clone.flush();
        }
        let hot = std::fs::read_to_string(dir.path().join("perf_hot.log")).unwrap();
        assert!(hot.contains("\"perf.hot.span\""));
        assert!(hot.contains("paginate.pages"));
        let main = std::fs::read_to_string(&path).unwrap();
        assert_eq!(main.lines().count(), 2);
    }
}
