//! Paper execution: fills at the latest close from the market provider,
//! shifted against the trader by a fixed slippage.

use std::sync::Arc;

use tracing::info;
use tradeloop_core::domain::{Position, PositionSide};
use tradeloop_core::ports::{Fill, MarketDataProvider, OrderExecutor, ProviderError};

pub struct PaperExecutor {
    market: Arc<dyn MarketDataProvider>,
    interval: String,
    slippage_bps: f64,
}

impl PaperExecutor {
    pub fn new(market: Arc<dyn MarketDataProvider>, interval: impl Into<String>, slippage_bps: f64) -> Self {
        Self {
            market,
            interval: interval.into(),
            slippage_bps: slippage_bps.max(0.0),
        }
    }

    fn last_close(&self, symbol: &str) -> Result<f64, ProviderError> {
        self.market
            .candles(symbol, &self.interval, 1)?
            .last()
            .map(|c| c.close)
            .ok_or_else(|| ProviderError::DataUnavailable(format!("no price for {symbol}")))
    }

    /// Buying pays up, selling gives up.
    fn slipped(&self, price: f64, buying: bool) -> f64 {
        let slip = self.slippage_bps / 10_000.0;
        if buying {
            price * (1.0 + slip)
        } else {
            price * (1.0 - slip)
        }
    }
}

impl OrderExecutor for PaperExecutor {
    fn name(&self) -> &str {
        "paper"
    }

    fn open_position(
        &self,
        symbol: &str,
        side: PositionSide,
        size: f64,
    ) -> Result<Fill, ProviderError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(ProviderError::Rejected(format!("invalid order size {size}")));
        }
        let price = self.slipped(self.last_close(symbol)?, side == PositionSide::Long);
        info!(symbol, %side, size, price, "paper open");
        Ok(Fill { price, size })
    }

    fn close_position(&self, position: &Position) -> Result<Fill, ProviderError> {
        let price = self.slipped(
            self.last_close(&position.symbol)?,
            position.side == PositionSide::Short,
        );
        info!(symbol = %position.symbol, side = %position.side, size = position.size, price, "paper close");
        Ok(Fill {
            price,
            size: position.size,
        })
    }
}
