//! Order executors: paper fills against the quote book and the live Upstox
//! client, both paced by a shared throttle.

pub mod paper;
pub mod throttle;
pub mod upstox;

pub use paper::PaperExecutor;
pub use throttle::{Throttle, ThrottleConfig};
pub use upstox::UpstoxClient;
