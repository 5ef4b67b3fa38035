use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};

use crate::common::{at, quiet, FlakyRepo, StepClock, TokioClock, BASE_MS};
use stock_ticker::clock::{Clock, SystemClock};
use stock_ticker::engine::{FixedDraw, StockMachine, TickDriver, TickStatus};
use stock_ticker::repo::{Backends, DocumentStore, StockRepository};
use stock_ticker::state::MachineStateStore;
use stock_ticker::types::MachineState;

const PERIOD: Duration = Duration::from_millis(1000);

struct Rig {
    driver: Arc<TickDriver>,
    state: Arc<MachineStateStore>,
    repo: Arc<FlakyRepo>,
}

fn rig(state: Option<MachineState>, write_delay: Option<Duration>) -> Rig {
    let clock: Arc<dyn Clock> = Arc::new(TokioClock::new(at(BASE_MS)));
    rig_with(clock, MachineStateStore::in_memory(state), write_delay, None)
}

fn rig_with(
    clock: Arc<dyn Clock>,
    state: MachineStateStore,
    write_delay: Option<Duration>,
    poll: Option<Duration>,
) -> Rig {
    let store: Arc<dyn StockRepository> =
        Arc::new(DocumentStore::new(ChronoDuration::hours(1), clock.clone()));
    let mut repo = FlakyRepo::new("document", store);
    if let Some(d) = write_delay {
        repo = repo.slow_writes(d);
    }
    let repo = Arc::new(repo);
    let canonical: Arc<dyn StockRepository> = repo.clone();

    let machine = Arc::new(StockMachine::new(
        vec!["HSTK".into(), "FBAS".into(), "QIX".into()],
        Backends::new(canonical.clone(), vec![canonical]),
        Arc::new(FixedDraw(quiet())),
    ));
    let state = Arc::new(state);
    let mut driver = TickDriver::new(machine, state.clone(), clock, PERIOD);
    if let Some(every) = poll {
        driver = driver.with_poll(every);
    }
    let driver = Arc::new(driver);
    Rig {
        driver,
        state,
        repo,
    }
}

async fn last_tick(state: &MachineStateStore) -> i64 {
    state.load().await.unwrap().unwrap().last_tick
}

#[tokio::test(start_paused = true)]
async fn bounded_loop_runs_exactly_n_paced_ticks() {
    let r = rig(None, None);
    let start = Instant::now();

    let done = r.driver.run_loop(Some(3)).await.unwrap();

    assert_eq!(done, 3);
    // First tick is immediate, the next two wait a full period each.
    assert_eq!(start.elapsed(), Duration::from_millis(2000));
    assert_eq!(last_tick(&r.state).await, BASE_MS + 2000);
    // Seeded state stays enabled.
    assert!(r.state.load().await.unwrap().unwrap().enabled);
}

#[tokio::test(start_paused = true)]
async fn fast_tick_waits_out_the_rest_of_the_period() {
    let r = rig(Some(MachineState::enabled()), Some(Duration::from_millis(300)));

    r.driver.run_tick().await.unwrap();
    let first = last_tick(&r.state).await;
    assert_eq!(first, BASE_MS);

    // Writes took 300ms; the next tick must still start one period after the first.
    r.driver.run_tick().await.unwrap();
    assert_eq!(last_tick(&r.state).await - first, 1000);
}

#[tokio::test(start_paused = true)]
async fn slow_tick_is_followed_immediately() {
    let r = rig(Some(MachineState::enabled()), Some(Duration::from_millis(1500)));

    r.driver.run_tick().await.unwrap();
    let first = last_tick(&r.state).await;

    let before = Instant::now();
    r.driver.run_tick().await.unwrap();
    assert_eq!(last_tick(&r.state).await - first, 1500);
    // No pacing wait, and the quiet second tick has nothing to write.
    assert_eq!(before.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn disabled_machine_does_no_work() {
    let r = rig(
        Some(MachineState {
            enabled: false,
            last_tick: 0,
        }),
        None,
    );

    assert_eq!(r.driver.run_tick().await.unwrap(), TickStatus::Disabled);
    assert_eq!(r.driver.run_loop(None).await.unwrap(), 0);
    assert_eq!(r.repo.write_count(), 0);
    assert_eq!(last_tick(&r.state).await, 0);
}

#[tokio::test(start_paused = true)]
async fn empty_state_is_reported() {
    let r = rig(None, None);
    assert_eq!(r.driver.run_tick().await.unwrap(), TickStatus::Empty);
}

#[tokio::test(start_paused = true)]
async fn disable_during_a_tick_lets_it_finish_then_stops() {
    let r = rig(Some(MachineState::enabled()), Some(Duration::from_millis(500)));

    let driver = r.driver.clone();
    let running = tokio::spawn(async move { driver.run_loop(None).await });

    // Mid-way through the first tick's writes.
    sleep(Duration::from_millis(200)).await;
    r.state.set_enabled(false).await.unwrap();

    let done = running.await.unwrap().unwrap();
    assert_eq!(done, 1);
    assert_eq!(r.repo.write_count(), 3);

    let s = r.state.load().await.unwrap().unwrap();
    assert!(!s.enabled);
    assert_eq!(s.last_tick, BASE_MS);
}

#[tokio::test(start_paused = true)]
async fn watch_driver_ticks_once_per_write_until_shutdown() {
    let r = rig(Some(MachineState::enabled()), None);

    // Ticks at 0, 1000, 2000, 3000; shutdown lands in the wait before 4000.
    let done = r
        .driver
        .run_watch(sleep(Duration::from_millis(3500)))
        .await
        .unwrap();

    assert_eq!(done, 4);
    assert_eq!(last_tick(&r.state).await, BASE_MS + 3000);
}

#[tokio::test(start_paused = true)]
async fn watch_driver_idles_while_disabled_and_resumes_on_enable() {
    let r = rig(
        Some(MachineState {
            enabled: false,
            last_tick: 0,
        }),
        None,
    );

    let state = r.state.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(500)).await;
        state.set_enabled(true).await.unwrap();
    });

    // Enabled at 500: ticks at 500 and 1500, shutdown at 2200.
    let done = r
        .driver
        .run_watch(sleep(Duration::from_millis(2200)))
        .await
        .unwrap();

    assert_eq!(done, 2);
    assert_eq!(last_tick(&r.state).await, BASE_MS + 1500);
}

#[tokio::test(start_paused = true)]
async fn watch_driver_stops_rescheduling_once_disabled() {
    let r = rig(Some(MachineState::enabled()), None);

    let state = r.state.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(1200)).await;
        state.set_enabled(false).await.unwrap();
    });

    let done = r
        .driver
        .run_watch(sleep(Duration::from_millis(5000)))
        .await
        .unwrap();

    // Ticks at 0 and 1000 only.
    assert_eq!(done, 2);
    assert_eq!(last_tick(&r.state).await, BASE_MS + 1000);
}

#[tokio::test]
async fn every_price_in_a_tick_carries_the_committed_tick_time() {
    // Each read of this clock is 1ms later than the last.
    let r = rig_with(
        Arc::new(StepClock::new(BASE_MS)),
        MachineStateStore::in_memory(Some(MachineState::enabled())),
        None,
        None,
    );

    r.driver.run_tick().await.unwrap();
    let tick = at(last_tick(&r.state).await);

    for t in ["HSTK", "FBAS", "QIX"] {
        let live = r.repo.get_live_price(t).await.unwrap().unwrap();
        assert_eq!(live.time, tick, "{t}");
        let hist = r.repo.history(t).await.unwrap();
        assert_eq!(hist.len(), 1);
        assert_eq!(hist[0].time, tick, "{t}");
    }
}

async fn truncated_state_file(dir: &tempfile::TempDir) -> (std::path::PathBuf, MachineStateStore) {
    let path = dir.path().join("machine.json");
    std::fs::write(&path, r#"{"enabled":true,"lastTick":0}"#).unwrap();
    let state = MachineStateStore::open(&path).await.unwrap();
    std::fs::write(&path, "").unwrap();
    (path, state)
}

#[tokio::test]
async fn watch_driver_outlives_a_truncated_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let (path, state) = truncated_state_file(&dir).await;
    let r = rig_with(
        Arc::new(SystemClock),
        state,
        None,
        Some(Duration::from_millis(10)),
    );

    let restore = path.clone();
    tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        std::fs::write(&restore, r#"{"enabled":true,"lastTick":1}"#).unwrap();
    });

    // Unreadable until 200ms, then one tick; shutdown lands in the next wait.
    let done = r
        .driver
        .run_watch(sleep(Duration::from_millis(600)))
        .await
        .unwrap();

    assert_eq!(done, 1);
    assert!(last_tick(&r.state).await > 1);
}

#[tokio::test]
async fn timer_loop_retries_a_truncated_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let (path, state) = truncated_state_file(&dir).await;
    let r = rig_with(Arc::new(SystemClock), state, None, None);

    tokio::spawn(async move {
        sleep(Duration::from_millis(200)).await;
        std::fs::write(&path, r#"{"enabled":true,"lastTick":1}"#).unwrap();
    });

    // First attempt fails and waits a period; the retry ticks.
    let done = r.driver.run_loop(Some(1)).await.unwrap();

    assert_eq!(done, 1);
    assert!(last_tick(&r.state).await > 1);
    assert_eq!(r.repo.write_count(), 3);
}
