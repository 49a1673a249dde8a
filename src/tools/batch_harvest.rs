use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context, Result};
use tokio::sync::Notify;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::core::config::HarvestConfig;
use crate::core::types::{result_key, BatchDescriptor, RunSummary, StationId};
use crate::features::ledger::{CorruptLedgerPolicy, LedgerStore, ProgressLedger};
use crate::features::result_sink::ResultSink;
use crate::scraping::driver::{PageDriver, PageSession};
use crate::tools::directions::DirectionResolver;
use crate::tools::pagination::PaginationExtractor;

/// Cooperative stop request, honored at batch boundaries.
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless a stop arrives first. Returns `true` if stopped.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_triggered(),
            _ = notified => true,
        }
    }
}

/// Drives station IDs through the page driver in fixed-size batches and keeps
/// the progress ledger current.
///
/// The harvester is the only writer of the ledger; it is persisted at every
/// batch boundary (and after every station with `ledger.flush_per_station`).
pub struct BatchHarvester<'a, D: PageDriver> {
    driver: &'a D,
    config: &'a HarvestConfig,
    store: LedgerStore,
    ledger: ProgressLedger,
    sink: ResultSink,
    stop: StopSignal,
}

impl<'a, D: PageDriver> BatchHarvester<'a, D> {
    pub fn new(
        driver: &'a D,
        config: &'a HarvestConfig,
        store: LedgerStore,
        ledger: ProgressLedger,
        sink: ResultSink,
        stop: StopSignal,
    ) -> Self {
        Self {
            driver,
            config,
            store,
            ledger,
            sink,
            stop,
        }
    }

    /// Lock and load the ledger and prepare the output directory from `config.output`.
    pub fn open(driver: &'a D, config: &'a HarvestConfig, stop: StopSignal) -> Result<Self> {
        let policy = if config.ledger.reset_on_corrupt {
            CorruptLedgerPolicy::Reset
        } else {
            CorruptLedgerPolicy::Abort
        };
        let (store, ledger) = LedgerStore::open(&config.output.ledger_path(), policy)?;
        let sink = ResultSink::create(&config.output)?;
        Ok(Self::new(driver, config, store, ledger, sink, stop))
    }

    pub fn ledger(&self) -> &ProgressLedger {
        &self.ledger
    }

    pub fn sink(&self) -> &ResultSink {
        &self.sink
    }

    pub async fn run(&mut self, all_station_ids: &[StationId], batch_size: usize) -> Result<RunSummary> {
        ensure!(batch_size >= 1, "batch size must be at least 1");
        let run_start = Instant::now();
        let mut summary = RunSummary::default();

        let mut seen = HashSet::new();
        let unique: Vec<&StationId> = all_station_ids.iter().filter(|id| seen.insert(*id)).collect();
        let pending: Vec<StationId> = unique
            .iter()
            .filter(|id| !self.ledger.is_completed(id))
            .map(|id| (*id).clone())
            .collect();
        summary.skipped_completed = unique.len() - pending.len();

        let batches: Vec<&[StationId]> = pending.chunks(batch_size).collect();
        let first_batch = self.ledger.next_batch_number();
        if !batches.is_empty() {
            summary.first_batch = Some(first_batch);
        }

        info!(
            "Starting harvest of {} stations ({} already completed) in {} batches of up to {}",
            pending.len(),
            summary.skipped_completed,
            batches.len(),
            batch_size
        );

        for (i, chunk) in batches.iter().enumerate() {
            if self.stop.is_triggered() {
                summary.interrupted = true;
                warn!("⏹️  Stop requested; not starting batch {}", first_batch + i as u64);
                break;
            }

            let number = first_batch + i as u64;
            let (completed, failed) = self.run_batch(number, chunk, i + 1, batches.len()).await?;
            summary.batches_run += 1;
            summary.stations_completed += completed;
            summary.stations_failed += failed;

            if i + 1 < batches.len() {
                let pause = self.config.pacing.between_batches.sample();
                if !pause.is_zero() {
                    info!("⏳ Cooling down {}s before the next batch", pause.as_secs());
                }
                if self.stop.sleep(pause).await {
                    summary.interrupted = true;
                    warn!("⏹️  Stop requested; ledger saved through batch {}", number);
                    break;
                }
            }
        }

        info!(
            "Harvest finished: {} batches, {} completed, {} failed, {}s{}",
            summary.batches_run,
            summary.stations_completed,
            summary.stations_failed,
            run_start.elapsed().as_secs(),
            if summary.interrupted { " (interrupted)" } else { "" }
        );
        Ok(summary)
    }

    /// Process one batch and persist it. Returns `(completed, failed)` counts.
    async fn run_batch(
        &mut self,
        number: u64,
        chunk: &[StationId],
        ordinal: usize,
        total: usize,
    ) -> Result<(usize, usize)> {
        let mut batch = BatchDescriptor::start(number, chunk.to_vec());
        info!(
            "📦 Batch {} ({}/{}): {} stations",
            number,
            ordinal,
            total,
            chunk.len()
        );

        for (j, id) in chunk.iter().enumerate() {
            if self.ledger.is_completed(id) {
                debug!("{} already completed, skipping", id);
                continue;
            }

            let success = self
                .harvest_station(id)
                .instrument(info_span!("station", id = %id))
                .await;
            batch.record(id, success);
            if success {
                self.ledger.mark_completed(id);
            } else {
                self.ledger.mark_failed(id);
            }

            if self.config.ledger.flush_per_station {
                self.store
                    .save(&self.ledger)
                    .with_context(|| format!("saving ledger after station {}", id))?;
            }

            if j + 1 < chunk.len() {
                let pause = self.config.pacing.between_stations.sample();
                if !pause.is_zero() {
                    debug!("pausing {}ms", pause.as_millis());
                    tokio::time::sleep(pause).await;
                }
            }
        }

        batch.finish();
        let batch_path = self
            .sink
            .write_batch(&batch)
            .with_context(|| format!("persisting batch {}", number))?;
        self.ledger.finish_batch(number, chunk.len());
        self.store
            .save(&self.ledger)
            .with_context(|| format!("saving ledger after batch {}", number))?;

        info!(
            "📦 Batch {} done: {} ok, {} failed → {}",
            number,
            batch.successful.len(),
            batch.failed.len(),
            batch_path.display()
        );
        Ok((batch.successful.len(), batch.failed.len()))
    }

    /// Harvest every view of one station. Never propagates: any failure is
    /// logged and reported as `false`.
    async fn harvest_station(&mut self, id: &StationId) -> bool {
        let started = Instant::now();
        let mut session = match self.driver.open(id).await {
            Ok(s) => s,
            Err(e) => {
                error!("❌ {}: {}", id, e);
                return false;
            }
        };

        let outcome = self.harvest_views(&mut session, id).await;
        if let Err(e) = session.close().await {
            warn!("closing session for {}: {}", id, e);
        }

        match outcome {
            Ok(true) => {
                info!("✅ {} in {}ms", id, started.elapsed().as_millis());
                true
            }
            Ok(false) => {
                warn!("❌ {} incomplete: a direction or page limit failed", id);
                false
            }
            Err(e) => {
                error!("❌ {}: {:#}", id, e);
                false
            }
        }
    }

    /// Two-way view first, then each discovered direction. Every extraction
    /// obtained is written, even when a later direction fails the station.
    async fn harvest_views<S: PageSession>(&mut self, session: &mut S, id: &StationId) -> Result<bool> {
        let cfg = self.config;
        let resolver = DirectionResolver::new(
            &cfg.selectors,
            Duration::from_millis(cfg.extraction.activation_settle_ms),
        );
        let extractor = PaginationExtractor::from_config(cfg);

        let directions = resolver.discover(session).await;
        if !directions.is_empty() {
            let codes: Vec<&str> = directions.keys().map(|d| d.code()).collect();
            info!("directions: {}", codes.join(", "));
        }

        let mut complete = true;

        let base = extractor.extract(session).await;
        complete &= !base.termination.is_station_failure();
        self.sink.append(&result_key(id, None), &base.records)?;

        for (direction, value) in directions {
            if !resolver
                .activate(session, direction, &value, cfg.extraction.activation_timeout())
                .await
            {
                complete = false;
                continue;
            }
            let extraction = extractor.extract(session).await;
            complete &= !extraction.termination.is_station_failure();
            self.sink
                .append(&result_key(id, Some(direction)), &extraction.records)?;
        }

        Ok(complete)
    }
}
