//! Contract scenario runner.
//!
//! Drives a running server over HTTP exactly the way the load-test contract
//! does, and checks the balances it must end up with:
//!
//! 1. Create accounts A and B.
//! 2. Fund A with 100 BTC and B with 500000 BRL.
//! 3. A places `rounds` sell orders of 1 BTC @ 100; B places `rounds` buy
//!    orders of 1 BTC @ 100. Every pair matches one for one.
//! 4. A places one sell of 50 BTC @ 100; B absorbs it with 100 buys of
//!    0.5 BTC @ 100.
//!
//! With the default `rounds = 10` the expected balances are
//! A = {BTC 90, BRL 1000}, B = {BTC 10, BRL 499000} after step 3 and
//! A = {BTC 40, BRL 6000}, B = {BTC 60, BRL 494000} after step 4.

use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("{step}: expected status {expected}, got {actual}")]
    Status {
        step: String,
        expected: StatusCode,
        actual: StatusCode,
    },
    #[error("account {account}: expected {asset} balance {expected}, got {actual}")]
    Balance {
        account: Uuid,
        asset: String,
        expected: Decimal,
        actual: Decimal,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Clone, Debug)]
pub struct ScenarioConfig {
    /// Base URL including the version prefix, e.g. `http://localhost:8000/v1`.
    pub api_base: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Number of 1-unit sell/buy pairs in the first phase, capped at 50 so
    /// the 50 BTC sell in the second phase is still covered.
    pub rounds: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".into(),
            base_asset: "BTC".into(),
            quote_asset: "BRL".into(),
            rounds: 10,
        }
    }
}

#[derive(Deserialize)]
struct Created {
    id: Uuid,
}

#[derive(Deserialize)]
struct AccountBody {
    balances: Vec<BalanceBody>,
}

#[derive(Deserialize)]
struct BalanceBody {
    asset_code: String,
    balance: Decimal,
}

struct Runner<'a> {
    client: Client,
    cfg: &'a ScenarioConfig,
}

impl Runner<'_> {
    async fn expect(
        &self,
        step: &str,
        req: reqwest::RequestBuilder,
        expected: StatusCode,
    ) -> Result<reqwest::Response, ScenarioError> {
        let resp = req.send().await?;
        if resp.status() != expected {
            return Err(ScenarioError::Status {
                step: step.to_string(),
                expected,
                actual: resp.status(),
            });
        }
        Ok(resp)
    }

    async fn create_account(&self, name: &str) -> Result<Uuid, ScenarioError> {
        let req = self
            .client
            .post(format!("{}/accounts", self.cfg.api_base))
            .json(&json!({ "name": name }));
        let created: Created = self
            .expect("create account", req, StatusCode::CREATED)
            .await?
            .json()
            .await?;
        Ok(created.id)
    }

    async fn charge(&self, account: Uuid, asset: &str, amount: u64) -> Result<(), ScenarioError> {
        let req = self
            .client
            .post(format!("{}/accounts/{}/charge", self.cfg.api_base, account))
            .json(&json!({ "amount": amount, "asset_code": asset }));
        self.expect("charge", req, StatusCode::OK).await?;
        Ok(())
    }

    async fn order(
        &self,
        account: Uuid,
        side: &str,
        quantity: f64,
        price: u64,
    ) -> Result<(), ScenarioError> {
        let req = self
            .client
            .post(format!("{}/order_book", self.cfg.api_base))
            .json(&json!({
                "account_id": account,
                "asset_code": self.cfg.base_asset,
                "quantity": quantity,
                "price": price,
                "order_type": side,
            }));
        self.expect("place order", req, StatusCode::NO_CONTENT).await?;
        Ok(())
    }

    async fn check_balances(
        &self,
        account: Uuid,
        base: Decimal,
        quote: Decimal,
    ) -> Result<(), ScenarioError> {
        let req = self
            .client
            .get(format!("{}/accounts/{}", self.cfg.api_base, account));
        let body: AccountBody = self
            .expect("get account", req, StatusCode::OK)
            .await?
            .json()
            .await?;
        for (asset, expected) in [(&self.cfg.base_asset, base), (&self.cfg.quote_asset, quote)] {
            let actual = body
                .balances
                .iter()
                .find(|b| &b.asset_code == asset)
                .map(|b| b.balance)
                .unwrap_or_default();
            if actual != expected {
                return Err(ScenarioError::Balance {
                    account,
                    asset: asset.clone(),
                    expected,
                    actual,
                });
            }
        }
        info!(%account, %base, %quote, "balances ok");
        Ok(())
    }
}

/// Runs the whole scenario once against `cfg.api_base`.
pub async fn run_scenario(cfg: &ScenarioConfig) -> Result<(), ScenarioError> {
    let r = Runner {
        client: Client::new(),
        cfg,
    };
    let rounds = u64::from(cfg.rounds.min(50));
    let price: u64 = 100;

    let a = r.create_account("Account 1").await?;
    let b = r.create_account("Account 2").await?;
    r.charge(a, &cfg.base_asset, 100).await?;
    r.charge(b, &cfg.quote_asset, 500_000).await?;

    for _ in 0..rounds {
        r.order(a, "sell", 1.0, price).await?;
    }
    for _ in 0..rounds {
        r.order(b, "buy", 1.0, price).await?;
    }
    let traded = Decimal::from(rounds);
    let notional = traded * Decimal::from(price);
    r.check_balances(a, Decimal::from(100) - traded, notional).await?;
    r.check_balances(b, traded, Decimal::from(500_000) - notional).await?;
    info!(rounds, "one-for-one phase passed");

    r.order(a, "sell", 50.0, price).await?;
    for _ in 0..100 {
        r.order(b, "buy", 0.5, price).await?;
    }
    let big = Decimal::from(50);
    let big_notional = big * Decimal::from(price);
    r.check_balances(a, Decimal::from(100) - traded - big, notional + big_notional)
        .await?;
    r.check_balances(
        b,
        traded + big,
        Decimal::from(500_000) - notional - big_notional,
    )
    .await?;
    info!("partial-fill phase passed");
    Ok(())
}
