pub mod calendar;
pub mod engine;
pub mod feed;
pub mod ironfly;
pub mod journal;
pub mod schedule;
pub mod service;
pub mod snapshot;
pub mod store;

pub use calendar::{CalendarState, CalendarStrategy, RollOutcome, Slot};
pub use engine::{EngineContext, EntryOutcome, ExitReason, OptionStrategy, SharedJournal};
pub use feed::{ChainBuilder, InstrumentCatalog, LiveFeed, MarketFeed};
pub use ironfly::{IronflyState, IronflyStrategy};
pub use journal::{TradeJournal, TradeRecord};
pub use schedule::{ExpirySchedule, Scheduler};
pub use service::{PnlSummary, TradingService};
pub use snapshot::{MarketSnapshot, TimingFlags};
pub use store::{JsonStateStore, PersistenceError, StateStore};
