#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use stock_ticker::clock::Clock;
use stock_ticker::engine::{Draw, FixedDraw, StockMachine};
use stock_ticker::error::StoreError;
use stock_ticker::repo::{Backends, DocumentStore, PathTree, StockRepository};
use stock_ticker::types::{HistoryRecord, StockPrice};

pub const BASE_MS: i64 = 1_700_000_000_000;

pub fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

pub fn quiet() -> Draw {
    Draw {
        direction: 0.50,
        magnitude: 0.005,
    }
}

/// Wall clock that follows tokio's (pausable) clock.
pub struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.start.elapsed();
        self.base + Duration::milliseconds(elapsed.as_millis() as i64)
    }
}

/// Clock that moves forward 1ms every time it is read.
pub struct StepClock {
    next_ms: AtomicI64,
}

impl StepClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            next_ms: AtomicI64::new(start_ms),
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        at(self.next_ms.fetch_add(1, Ordering::SeqCst))
    }
}

/// Wraps a repository and fails or slows chosen operations.
pub struct FlakyRepo {
    inner: Arc<dyn StockRepository>,
    name: String,
    fail_reads: HashSet<String>,
    fail_writes: bool,
    write_delay: Option<std::time::Duration>,
    pub writes: AtomicUsize,
}

impl FlakyRepo {
    pub fn new(name: &str, inner: Arc<dyn StockRepository>) -> Self {
        Self {
            inner,
            name: name.to_string(),
            fail_reads: HashSet::new(),
            fail_writes: false,
            write_delay: None,
            writes: AtomicUsize::new(0),
        }
    }

    pub fn failing_reads(mut self, tickers: &[&str]) -> Self {
        self.fail_reads = tickers.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn slow_writes(mut self, by: std::time::Duration) -> Self {
        self.write_delay = Some(by);
        self
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn down(&self) -> StoreError {
        StoreError::Unavailable {
            backend: self.name.clone(),
            reason: "injected".to_string(),
        }
    }
}

#[async_trait]
impl StockRepository for FlakyRepo {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_live_price(&self, ticker: &str) -> Result<Option<StockPrice>, StoreError> {
        if self.fail_reads.contains(ticker) {
            return Err(self.down());
        }
        self.inner.get_live_price(ticker).await
    }

    async fn update_price(&self, ticker: &str, price: &StockPrice) -> Result<(), StoreError> {
        if let Some(d) = self.write_delay {
            tokio::time::sleep(d).await;
        }
        if self.fail_writes {
            return Err(self.down());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.update_price(ticker, price).await
    }

    async fn history(&self, ticker: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        self.inner.history(ticker).await
    }

    async fn delete_expired_history(&self, ticker: &str) -> Result<usize, StoreError> {
        self.inner.delete_expired_history(ticker).await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.inner.flush().await
    }
}

/// Document store (canonical) + path tree (replica), as in the default config.
pub struct Market {
    pub machine: StockMachine,
    pub document: Arc<DocumentStore>,
    pub tree: Arc<PathTree>,
}

pub fn market(tickers: &[&str], draw: Draw, clock: Arc<dyn Clock>) -> Market {
    let document = Arc::new(DocumentStore::new(Duration::hours(24), clock.clone()));
    let tree = Arc::new(PathTree::new(Duration::hours(24), clock.clone()));
    let canonical: Arc<dyn StockRepository> = document.clone();
    let replica: Arc<dyn StockRepository> = tree.clone();
    let backends = Backends::new(canonical.clone(), vec![canonical, replica]);

    let machine = StockMachine::new(
        tickers.iter().map(|t| t.to_string()).collect(),
        backends,
        Arc::new(FixedDraw(draw)),
    );
    Market {
        machine,
        document,
        tree,
    }
}
