// Order lifecycle, exchange access and the trading loop
pub mod order_state;
pub mod paper;
pub mod resilient;
pub mod session;
pub mod trader;

pub use order_state::{detect_fill, FillEvent, OrderState, OrderStateMachine, CANCEL_AFTER_MINUTES};
pub use paper::PaperExchange;
pub use resilient::{ResilientExchange, RetryPolicy};
pub use session::{PortfolioSnapshot, SessionStats, SessionSummary};
pub use trader::{CycleOutcome, Trader};
