//! Property tests over random order flow: whatever is submitted, assets are
//! neither created nor destroyed, balances stay non-negative, and the book
//! never rests crossed.

use clob_engine::{
    engine::{EngineConfig, MatchingEngine, OrderRequest},
    errors::EngineError,
    instrument::AssetCode,
    orders::Side,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

const ACCOUNTS: usize = 4;

fn engine() -> MatchingEngine {
    MatchingEngine::new(EngineConfig {
        quote: "BRL".parse().unwrap(),
        assets: vec!["BTC".parse().unwrap()],
    })
    .unwrap()
}

/// (account index, is_buy, price in cents, quantity in tenths)
fn order_strategy() -> impl Strategy<Value = (usize, bool, i64, i64)> {
    (0..ACCOUNTS, any::<bool>(), 9_000i64..11_000, 1i64..50)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn random_flow_conserves_assets(orders in prop::collection::vec(order_strategy(), 1..120)) {
        let e = engine();
        let btc: AssetCode = "BTC".parse().unwrap();
        let brl: AssetCode = "BRL".parse().unwrap();
        let ids: Vec<_> = (0..ACCOUNTS).map(|i| e.create_account(format!("p{i}"))).collect();
        for &id in &ids {
            e.fund_account(id, "BTC", Decimal::from(20)).unwrap();
            e.fund_account(id, "BRL", Decimal::from(2_000)).unwrap();
        }

        for (who, is_buy, cents, tenths) in orders {
            let result = e.place_order(OrderRequest {
                account_id: ids[who],
                asset_code: "BTC".into(),
                side: if is_buy { Side::Buy } else { Side::Sell },
                price: Decimal::new(cents, 2),
                quantity: Decimal::new(tenths, 1),
            });
            match result {
                Ok(_) | Err(EngineError::InsufficientFunds { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected rejection: {other}"),
            }

            prop_assert_eq!(e.ledger().total_supply(&btc), Decimal::from(20 * ACCOUNTS as i64));
            prop_assert_eq!(e.ledger().total_supply(&brl), Decimal::from(2_000 * ACCOUNTS as i64));
        }

        for &id in &ids {
            for asset in [&btc, &brl] {
                let b = e.ledger().balance(id, asset).unwrap();
                prop_assert!(b.available >= Decimal::ZERO);
                prop_assert!(b.reserved >= Decimal::ZERO);
            }
        }

        let snap = e.depth("BTC", usize::MAX).unwrap();
        if let (Some(bid), Some(ask)) = (snap.bids.first(), snap.asks.first()) {
            prop_assert!(bid.0 < ask.0);
        }
    }
}
