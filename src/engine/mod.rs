pub mod machine;
pub mod task;
pub mod walk;

pub use machine::{StockMachine, TickReport};
pub use task::{pacing_delay, TickDriver, TickStatus};
pub use walk::{advance_price, Draw, DrawSource, FixedDraw, RandomDraws};
