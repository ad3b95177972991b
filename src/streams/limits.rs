use super::{BlockStream, BoxedStream};
use crate::block::{Block, Header};
use crate::context::{CancellationToken, QueryContext};
use crate::error::{QueryError, Result};
use crate::metrics::{names, MetricsCollector};
use crate::settings::{OverflowMode, Settings, SizeLimits};
use crate::sort::SortDescription;
use crate::storage::TableLockHolder;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::debug;

/// Rows and bytes read by every chain of one query.
///
/// The clock starts on the first read of any chain, not when the pipeline
/// is built.
#[derive(Debug)]
pub struct ProgressCounter {
    rows: AtomicUsize,
    bytes: AtomicUsize,
    started: OnceLock<Instant>,
}

impl ProgressCounter {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self { rows: AtomicUsize::new(0), bytes: AtomicUsize::new(0), started: OnceLock::new() })
    }

    /// Start the clock; later calls are no-ops.
    pub fn start(&self) {
        self.started.get_or_init(Instant::now);
    }

    /// Account for one block and return the query-wide totals.
    pub fn add(&self, rows: usize, bytes: usize) -> (usize, usize) {
        let total_rows = self.rows.fetch_add(rows, Ordering::Relaxed) + rows;
        let total_bytes = self.bytes.fetch_add(bytes, Ordering::Relaxed) + bytes;
        (total_rows, total_bytes)
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows.load(Ordering::Relaxed)
    }

    /// Zero until [`start`](Self::start) is called.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.get().map_or(Duration::ZERO, Instant::elapsed)
    }
}

/// Read-side caps attached to the source streams.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalLimits {
    pub size: SizeLimits,
    /// Zero means no time cap.
    pub max_execution_time: Duration,
    pub timeout_overflow_mode: OverflowMode,
    /// Rows per second; zero disables the check.
    pub min_execution_speed: usize,
    pub timeout_before_checking_execution_speed: Duration,
}

impl LocalLimits {
    /// Read limits from `settings`. The speed check applies only on the
    /// stage that produces the final result.
    #[must_use]
    pub const fn for_read(settings: &Settings, final_stage: bool) -> Self {
        Self {
            size: settings.read_limits(),
            max_execution_time: Duration::from_millis(settings.max_execution_time_ms),
            timeout_overflow_mode: settings.timeout_overflow_mode,
            min_execution_speed: if final_stage { settings.min_execution_speed } else { 0 },
            timeout_before_checking_execution_speed: if final_stage {
                Duration::from_millis(settings.timeout_before_checking_execution_speed_ms)
            } else {
                Duration::ZERO
            },
        }
    }
}

/// Decorates a source stream with read caps, the execution time cap, the
/// minimum speed check, the table lock and the query's cancellation token.
pub struct LimitsStream {
    input: [BoxedStream; 1],
    limits: LocalLimits,
    progress: Arc<ProgressCounter>,
    cancel: CancellationToken,
    metrics: MetricsCollector,
    table_lock: Option<Arc<TableLockHolder>>,
    /// Counts rows and bytes into the read metrics.
    source: bool,
    finished: bool,
}

impl LimitsStream {
    #[must_use]
    pub fn new(input: BoxedStream, limits: LocalLimits, progress: Arc<ProgressCounter>, ctx: &QueryContext) -> Self {
        Self {
            input: [input],
            limits,
            progress,
            cancel: ctx.cancel.clone(),
            metrics: ctx.metrics.clone(),
            table_lock: None,
            source: true,
            finished: false,
        }
    }

    /// Result-size caps of the outermost query, `max_result_rows` and
    /// `max_result_bytes`.
    #[must_use]
    pub fn for_result(input: BoxedStream, limits: SizeLimits, ctx: &QueryContext) -> Self {
        let limits = LocalLimits { size: limits, ..LocalLimits::default() };
        Self { source: false, ..Self::new(input, limits, ProgressCounter::new(), ctx) }
    }

    /// Hold `lock` for as long as this stream lives.
    #[must_use]
    pub fn with_table_lock(mut self, lock: Option<Arc<TableLockHolder>>) -> Self {
        self.table_lock = lock;
        self
    }

    fn check_time(&mut self) -> Result<bool> {
        let elapsed = self.progress.elapsed();
        let max = self.limits.max_execution_time;
        if !max.is_zero() && elapsed > max {
            match self.limits.timeout_overflow_mode {
                OverflowMode::Throw => {
                    return Err(QueryError::Timeout { elapsed_ms: elapsed.as_millis(), max_ms: max.as_millis() });
                }
                OverflowMode::Break | OverflowMode::Any => {
                    debug!(elapsed_ms = elapsed.as_millis(), "execution time cap reached, stopping read");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn check_speed(&self) -> Result<()> {
        let min_speed = self.limits.min_execution_speed;
        let elapsed = self.progress.elapsed();
        if min_speed == 0 || elapsed <= self.limits.timeout_before_checking_execution_speed || elapsed.is_zero() {
            return Ok(());
        }
        #[allow(clippy::cast_precision_loss)]
        let (rows, min) = (self.progress.rows() as f64, min_speed as f64);
        let speed = rows / elapsed.as_secs_f64();
        if speed < min {
            return Err(QueryError::TooSlow { speed, min_speed });
        }
        Ok(())
    }
}

impl BlockStream for LimitsStream {
    fn name(&self) -> &'static str {
        "Limits"
    }

    fn header(&self) -> Header {
        self.input[0].header()
    }

    fn read(&mut self) -> Result<Option<Block>> {
        if self.finished {
            return Ok(None);
        }
        self.cancel.check()?;
        self.progress.start();
        if !self.check_time()? {
            self.finished = true;
            return Ok(None);
        }
        let Some(block) = self.input[0].read()? else {
            self.finished = true;
            return Ok(None);
        };
        let bytes = block.byte_size();
        let (rows_total, bytes_total) = self.progress.add(block.rows(), bytes);
        if self.source {
            self.metrics.increment_counter(names::ROWS_READ, block.rows() as u64);
            self.metrics.increment_counter(names::BYTES_READ, bytes as u64);
        }
        let what = if self.source { "rows to read" } else { "result rows" };
        if !self.limits.size.check(rows_total, bytes_total, what)? {
            debug!(rows = rows_total, bytes = bytes_total, "read cap reached, stopping read");
            self.finished = true;
            self.input[0].cancel();
        }
        self.check_speed()?;
        Ok(Some(block))
    }

    fn inputs(&self) -> &[BoxedStream] {
        &self.input
    }

    fn inputs_mut(&mut self) -> &mut [BoxedStream] {
        &mut self.input
    }

    fn sort_description(&self) -> Option<&SortDescription> {
        self.input[0].sort_description()
    }

    fn cancel(&mut self) {
        self.finished = true;
        self.input[0].cancel();
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.limits.size.is_unlimited() {
            parts.push(format!("rows {} bytes {}", self.limits.size.max_rows, self.limits.size.max_bytes));
        }
        if !self.limits.max_execution_time.is_zero() {
            parts.push(format!("time {:?}", self.limits.max_execution_time));
        }
        if self.limits.min_execution_speed != 0 {
            parts.push(format!("min speed {}", self.limits.min_execution_speed));
        }
        if self.table_lock.is_some() {
            parts.push("table lock".to_string());
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Field;
    use crate::storage::Catalog;
    use crate::streams::{read_to_end, BlocksStream};
    use crate::types::{DataType, Value};

    fn source(blocks: usize) -> BoxedStream {
        let header = Header::new(vec![Field::new("x", DataType::Int64)]);
        let blocks = (0..blocks).map(|i| Block::from_rows(&header, vec![vec![Value::Int(i as i64)]]).unwrap()).collect();
        Box::new(BlocksStream::new(header, blocks))
    }

    fn time_capped(max: Duration) -> LocalLimits {
        LocalLimits { max_execution_time: max, ..LocalLimits::default() }
    }

    #[test]
    fn clock_starts_on_first_read() {
        let progress = ProgressCounter::new();
        assert_eq!(progress.elapsed(), Duration::ZERO);
        progress.start();
        std::thread::sleep(Duration::from_millis(5));
        let first = progress.elapsed();
        assert!(first >= Duration::from_millis(5));
        progress.start();
        assert!(progress.elapsed() >= first);
    }

    #[test]
    fn idle_pipeline_does_not_time_out() {
        let ctx = QueryContext::new(Settings::default(), Arc::new(Catalog::new()));
        let mut s = LimitsStream::new(source(2), time_capped(Duration::from_millis(20)), ProgressCounter::new(), &ctx);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(read_to_end(&mut s).unwrap().len(), 2);
    }

    #[test]
    fn time_cap_counts_from_first_read() {
        let ctx = QueryContext::new(Settings::default(), Arc::new(Catalog::new()));
        let progress = ProgressCounter::new();
        let mut s = LimitsStream::new(source(2), time_capped(Duration::from_millis(20)), progress.clone(), &ctx);
        assert!(s.read().unwrap().is_some());
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(s.read(), Err(QueryError::Timeout { .. })));
    }
}
