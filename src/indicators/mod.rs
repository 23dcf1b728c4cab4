// Indicators over the stored price history
pub mod moving_average;

pub use moving_average::{
    calculate_sma, rolling_bid_average, window_start, MovingAverageAggregator,
};
