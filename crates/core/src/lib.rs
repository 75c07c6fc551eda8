pub mod config;
pub mod config_loader;
pub mod error;
pub mod events;
pub mod greeks;
pub mod position;
pub mod selector;
pub mod traits;
pub mod types;

pub use config::{
    AppConfig, BrokerConfig, CalendarConfig, IronflyConfig, MarketConfig, RollRule, ScheduleConfig,
    StorageConfig, StrategyKind, TradingMode,
};
pub use config_loader::ConfigLoader;
pub use error::ExecutionError;
pub use events::{OrderRequest, OrderResponse, OrderStatus};
pub use greeks::{BlackScholes, GreeksProvider};
pub use position::{leg_pnl, open_pnl, unrealized_pnl};
pub use selector::OptionSelector;
pub use traits::{InstrumentMaster, OrderExecutor, QuoteSource};
pub use types::{Contract, ExpiryInfo, Instrument, Leg, LegRole, OptionType, QuoteBook, Side};
