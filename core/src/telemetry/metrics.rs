use std::sync::Mutex;

pub struct MetricsRecorder {
    inner: Mutex<Metrics>,
}

struct Metrics {
    packets_processed: usize,
    collects_completed: usize,
    stage_errors: usize,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Metrics {
                packets_processed: 0,
                collects_completed: 0,
                stage_errors: 0,
            }),
        }
    }

    pub fn record_packet(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.packets_processed += 1;
        }
    }

    pub fn record_collect(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.collects_completed += 1;
        }
    }

    pub fn record_stage_error(&self) {
        if let Ok(mut metrics) = self.inner.lock() {
            metrics.stage_errors += 1;
        }
    }

    /// (packets processed, collects completed, stage errors)
    pub fn snapshot(&self) -> (usize, usize, usize) {
        if let Ok(metrics) = self.inner.lock() {
            (
                metrics.packets_processed,
                metrics.collects_completed,
                metrics.stage_errors,
            )
        } else {
            (0, 0, 0)
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
