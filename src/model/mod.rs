pub mod candle;
pub mod regime;

pub use candle::{Candle, CandleColumns};
pub use regime::Regime;
