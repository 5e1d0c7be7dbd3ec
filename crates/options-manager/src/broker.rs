//! Broker seam for the lifecycle.
//!
//! The orchestrator talks to `BrokerApi`; `IgClient` is the production
//! implementation and tests substitute scripted brokers.

use async_trait::async_trait;
use strangle_ig::{
    Account, ClosePositionRequest, DealConfirmation, IgClient, MarketSummary, Navigation,
    OpenPositionRequest, PositionEntry, Result,
};

/// Trading operations the lifecycle needs from a broker session.
#[async_trait]
pub trait BrokerApi: Send + Sync {
    /// Browse the market tree from `node_id`, or from the root.
    async fn navigate_markets(&self, node_id: Option<&str>) -> Result<Navigation>;

    /// Search instruments by free text.
    async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>>;

    /// Submit a buy; returns the deal reference.
    async fn open_position(&self, order: &OpenPositionRequest) -> Result<String>;

    /// Submit a (partial) close; returns the deal reference.
    async fn close_position(&self, order: &ClosePositionRequest) -> Result<String>;

    /// Fill confirmation for a deal reference.
    async fn confirm_deal(&self, deal_reference: &str) -> Result<DealConfirmation>;

    async fn get_positions(&self) -> Result<Vec<PositionEntry>>;

    async fn get_accounts(&self) -> Result<Vec<Account>>;

    /// End the session.
    async fn logout(&self) -> Result<()>;
}

#[async_trait]
impl BrokerApi for IgClient {
    async fn navigate_markets(&self, node_id: Option<&str>) -> Result<Navigation> {
        IgClient::navigate_markets(self, node_id).await
    }

    async fn search_markets(&self, term: &str) -> Result<Vec<MarketSummary>> {
        IgClient::search_markets(self, term).await
    }

    async fn open_position(&self, order: &OpenPositionRequest) -> Result<String> {
        IgClient::open_position(self, order).await
    }

    async fn close_position(&self, order: &ClosePositionRequest) -> Result<String> {
        IgClient::close_position(self, order).await
    }

    async fn confirm_deal(&self, deal_reference: &str) -> Result<DealConfirmation> {
        IgClient::confirm_deal(self, deal_reference).await
    }

    async fn get_positions(&self) -> Result<Vec<PositionEntry>> {
        IgClient::get_positions(self).await
    }

    async fn get_accounts(&self) -> Result<Vec<Account>> {
        IgClient::get_accounts(self).await
    }

    async fn logout(&self) -> Result<()> {
        IgClient::logout(self).await
    }
}
