//! OTA Timing
//! 
//! Symbol-accurate over-the-air clock and the conversion of microsecond budgets
//! into symbol offsets.

pub mod budget;
pub mod clock;

pub use budget::{us_to_symbols, TimingBudget};
pub use clock::{ManualClock, OtaClock, OtaCursor, OtaPosition, SystemClock, Timeline, WallClock};
