use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::walk::{advance_price, DrawSource};
use crate::error::UpdateError;
use crate::repo::Backends;
use crate::types::{StockPrice, UpdateOutcome, INITIAL_PRICE};

/// Counts for one tick across the whole universe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub initialized: usize,
    pub moved: usize,
    pub unchanged: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn total(&self) -> usize {
        self.initialized + self.moved + self.unchanged + self.failed
    }

    pub fn written(&self) -> usize {
        self.initialized + self.moved
    }

    fn record(&mut self, res: &Result<UpdateOutcome, UpdateError>) {
        match res {
            Ok(UpdateOutcome::Initialized) => self.initialized += 1,
            Ok(UpdateOutcome::Moved) => self.moved += 1,
            Ok(UpdateOutcome::Unchanged) => self.unchanged += 1,
            Err(_) => self.failed += 1,
        }
    }
}

/// Advances every ticker in the universe once per tick.
///
/// Prices are read from the canonical backend only and written to every
/// backend. Tickers share nothing mutable, so they all run concurrently.
/// Every price written in one tick carries that tick's timestamp.
pub struct StockMachine {
    tickers: Arc<[String]>,
    backends: Backends,
    draws: Arc<dyn DrawSource>,
}

impl StockMachine {
    pub fn new(
        tickers: Vec<String>,
        backends: Backends,
        draws: Arc<dyn DrawSource>,
    ) -> Self {
        Self {
            tickers: tickers.into(),
            backends,
            draws,
        }
    }

    /// One full pass stamped `now`. Resolves once every ticker has settled
    /// and the backends have flushed; a failing ticker is logged and
    /// counted, never propagated.
    pub async fn on_tick(&self, now: DateTime<Utc>) -> TickReport {
        let results = join_all(self.tickers.iter().map(|t| self.update_stock(t, now))).await;

        let mut report = TickReport::default();
        for (ticker, res) in self.tickers.iter().zip(&results) {
            report.record(res);
            if let Err(e) = res {
                warn!(ticker = %ticker, "update failed: {e}");
            }
        }

        let writers = &self.backends.writers;
        let flushed = join_all(writers.iter().map(|w| w.flush())).await;
        for (w, res) in writers.iter().zip(flushed) {
            if let Err(e) = res {
                warn!(backend = w.name(), "flush failed: {e}");
            }
        }
        report
    }

    pub async fn update_stock(
        &self,
        ticker: &str,
        now: DateTime<Utc>,
    ) -> Result<UpdateOutcome, UpdateError> {
        let canonical = &self.backends.canonical;

        let current = canonical
            .get_live_price(ticker)
            .await
            .map_err(|source| UpdateError::Read {
                ticker: ticker.to_string(),
                backend: canonical.name().to_string(),
                source,
            })?;

        let (previous, next, outcome) = match current {
            Some(stock) => {
                let d = self.draws.draw(ticker);
                let price = advance_price(stock.price, d.direction, d.magnitude);
                (stock.price, StockPrice::new(price, now), UpdateOutcome::Moved)
            }
            None => (0.0, StockPrice::new(INITIAL_PRICE, now), UpdateOutcome::Initialized),
        };

        if previous == next.price {
            return Ok(UpdateOutcome::Unchanged);
        }

        self.write_all(ticker, &next).await?;
        debug!(ticker, price = next.price, previous, "price written");
        Ok(outcome)
    }

    async fn write_all(&self, ticker: &str, price: &StockPrice) -> Result<(), UpdateError> {
        let writers = &self.backends.writers;
        let results = join_all(writers.iter().map(|w| w.update_price(ticker, price))).await;

        let failed: Vec<_> = writers
            .iter()
            .zip(results)
            .filter_map(|(w, r)| r.err().map(|e| (w.name().to_string(), e)))
            .collect();

        if failed.is_empty() {
            Ok(())
        } else {
            Err(UpdateError::Write {
                ticker: ticker.to_string(),
                attempted: writers.len(),
                failed,
            })
        }
    }
}
