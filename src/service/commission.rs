// service/commission.rs
use std::collections::HashMap;

use bigdecimal::BigDecimal;
use num_traits::{One, Zero};
use uuid::Uuid;

use crate::{
    models::dispatchmodel::OrderSnapshot,
    utils::decimal::clamp,
};

/// Rates above 1 are percentages (`20` means 20%).
fn normalize_rate(rate: &BigDecimal) -> BigDecimal {
    if *rate > BigDecimal::one() {
        rate / BigDecimal::from(100)
    } else {
        rate.clone()
    }
}

/// First rate that is present wins: order, then product, then worker tier.
/// An explicit zero counts as present.
pub fn resolve_rate(
    order_rate: Option<&BigDecimal>,
    product_rate: Option<&BigDecimal>,
    tier_rate: Option<&BigDecimal>,
) -> BigDecimal {
    order_rate
        .or(product_rate)
        .or(tier_rate)
        .map(normalize_rate)
        .unwrap_or_else(BigDecimal::zero)
}

/// Take-home multiplier, always within [0, 1].
pub fn resolve_multiplier(
    order_rate: Option<&BigDecimal>,
    product_rate: Option<&BigDecimal>,
    tier_rate: Option<&BigDecimal>,
) -> BigDecimal {
    let rate = resolve_rate(order_rate, product_rate, tier_rate);
    clamp(BigDecimal::one() - rate, BigDecimal::zero(), BigDecimal::one())
}

/// Rates frozen at the start of a settlement run.
#[derive(Debug, Clone)]
pub struct CommissionSnapshot {
    order_rate: Option<BigDecimal>,
    product_rate: Option<BigDecimal>,
    tier_rates: HashMap<Uuid, Option<BigDecimal>>,
}

impl CommissionSnapshot {
    pub fn from_order(snapshot: &OrderSnapshot) -> Self {
        let mut tier_rates = HashMap::new();
        for participant in &snapshot.participants {
            tier_rates
                .entry(participant.worker_id)
                .or_insert_with(|| participant.tier_commission_rate.clone());
        }

        Self {
            order_rate: snapshot.order.commission_rate.clone(),
            product_rate: snapshot.product.commission_rate.clone(),
            tier_rates,
        }
    }

    pub fn multiplier_for(&self, worker_id: Uuid) -> BigDecimal {
        let tier_rate = self.tier_rates.get(&worker_id).and_then(|r| r.as_ref());
        resolve_multiplier(
            self.order_rate.as_ref(),
            self.product_rate.as_ref(),
            tier_rate,
        )
    }
}
