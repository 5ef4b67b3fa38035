use rand::Rng;

use crate::types::PRICE_FLOOR;

/// Below this the move is a crash.
pub const CRASH_BAND: f64 = 0.01;
/// [CRASH_BAND, RISE_BAND): price rises by `magnitude`.
pub const RISE_BAND: f64 = 0.35;
/// [RISE_BAND, FALL_BAND): price falls by `magnitude`. Above: no move.
pub const FALL_BAND: f64 = 0.45;

/// Fraction lost in a crash.
pub const CRASH_FRACTION: f64 = 0.1;
/// Exclusive upper bound of a normal move.
pub const MAX_MAGNITUDE: f64 = 1.0 / 90.0;

/// The two random inputs of one price step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Draw {
    /// Uniform in [0, 1).
    pub direction: f64,
    /// Uniform in [0, MAX_MAGNITUDE).
    pub magnitude: f64,
}

impl Draw {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            direction: rng.r#gen::<f64>(),
            magnitude: rng.r#gen::<f64>() / 90.0,
        }
    }
}

/// Supplies draws to the machine. One call per ticker per tick.
pub trait DrawSource: Send + Sync {
    fn draw(&self, ticker: &str) -> Draw;
}

/// Thread-local RNG draws.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDraws;

impl DrawSource for RandomDraws {
    fn draw(&self, _ticker: &str) -> Draw {
        Draw::sample(&mut rand::thread_rng())
    }
}

/// Same draw for every ticker, every tick.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub Draw);

impl DrawSource for FixedDraw {
    fn draw(&self, _ticker: &str) -> Draw {
        self.0
    }
}

/// One step of the random walk. Bands are half-open, and the result never
/// goes below [`PRICE_FLOOR`].
pub fn advance_price(old: f64, direction: f64, magnitude: f64) -> f64 {
    let mut price = old;
    if direction < CRASH_BAND {
        price -= price * CRASH_FRACTION;
    } else if direction < RISE_BAND {
        price += price * magnitude;
    } else if direction < FALL_BAND {
        price -= price * magnitude;
    }

    if price < PRICE_FLOOR {
        price = PRICE_FLOOR;
    }
    price
}
