// service/fixtures.rs
use std::collections::HashMap;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use crate::{
    db::memory::MemoryStore,
    models::dispatchmodel::*,
};

pub fn d(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

/// 2026-03-01 plus the given offset in minutes.
pub fn at(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minutes)
}

pub struct OrderBuilder {
    pub order: DispatchOrder,
    pub product: Product,
    pub rounds: Vec<DispatchRound>,
    pub participants: Vec<RoundParticipant>,
    pub allocations: HashMap<Uuid, BigDecimal>,
}

impl OrderBuilder {
    pub fn new(policy: BillingPolicy, paid: &str) -> Self {
        let product = Product {
            id: Uuid::new_v4(),
            name: "Standard boost".to_string(),
            category: ProductCategory::Standard,
            commission_rate: None,
        };
        let order = DispatchOrder {
            id: Uuid::new_v4(),
            product_id: product.id,
            paid_amount: d(paid),
            receivable_amount: d(paid),
            billing_policy: policy,
            guaranteed_quota: None,
            unit_price: None,
            commission_rate: None,
            is_gift: false,
            dispatcher_id: None,
            created_at: Some(at(0)),
        };

        Self {
            order,
            product,
            rounds: Vec::new(),
            participants: Vec::new(),
            allocations: HashMap::new(),
        }
    }

    pub fn order_id(&self) -> Uuid {
        self.order.id
    }

    pub fn category(mut self, category: ProductCategory) -> Self {
        self.product.category = category;
        self
    }

    pub fn unit_price(mut self, price: &str) -> Self {
        self.order.unit_price = Some(d(price));
        self
    }

    pub fn quota(mut self, quota: &str) -> Self {
        self.order.guaranteed_quota = Some(d(quota));
        self
    }

    pub fn order_rate(mut self, rate: &str) -> Self {
        self.order.commission_rate = Some(d(rate));
        self
    }

    pub fn dispatcher(mut self, dispatcher_id: Uuid) -> Self {
        self.order.dispatcher_id = Some(dispatcher_id);
        self
    }

    pub fn gift(mut self, receivable: &str) -> Self {
        self.order.is_gift = true;
        self.order.paid_amount = d("0");
        self.order.receivable_amount = d(receivable);
        self
    }

    /// Adds a round accepted at `start` and, for settled statuses, ended at `end`.
    pub fn round(&mut self, status: RoundStatus, start: i64, end: i64) -> Uuid {
        let id = Uuid::new_v4();
        let ended = Some(at(end));
        self.rounds.push(DispatchRound {
            id,
            order_id: self.order.id,
            sequence: self.rounds.len() as i32 + 1,
            status,
            accepted_at: Some(at(start)),
            archived_at: (status == RoundStatus::Archived).then_some(ended).flatten(),
            completed_at: (status == RoundStatus::Completed).then_some(ended).flatten(),
            deduction_minutes: 0,
            billable_minutes: None,
            billable_hours: None,
            updated_at: None,
        });
        id
    }

    pub fn deduction(&mut self, round_id: Uuid, minutes: i32) {
        if let Some(round) = self.rounds.iter_mut().find(|r| r.id == round_id) {
            round.deduction_minutes = minutes;
        }
    }

    pub fn participant(&mut self, round_id: Uuid, worker_id: Uuid, accepted: i64) -> &mut RoundParticipant {
        self.participants.push(RoundParticipant {
            id: Uuid::new_v4(),
            round_id,
            worker_id,
            accepted_at: Some(at(accepted)),
            rejected_at: None,
            contribution: None,
            is_active: true,
            tier_commission_rate: None,
        });
        self.participants.last_mut().unwrap()
    }

    pub fn contributor(&mut self, round_id: Uuid, worker_id: Uuid, contribution: &str) {
        self.participant(round_id, worker_id, 0).contribution = Some(d(contribution));
    }

    pub fn allocation(&mut self, round_id: Uuid, amount: &str) {
        self.allocations.insert(round_id, d(amount));
    }

    pub fn build(&self) -> OrderSnapshot {
        OrderSnapshot {
            order: self.order.clone(),
            product: self.product.clone(),
            rounds: self.rounds.clone(),
            participants: self.participants.clone(),
            allocations: self.allocations.clone(),
        }
    }

    pub async fn seed(&self, store: &MemoryStore) {
        let snapshot = self.build();
        store
            .seed(|state| {
                state.products.insert(snapshot.product.id, snapshot.product.clone());
                state.orders.insert(snapshot.order.id, snapshot.order.clone());
                for round in &snapshot.rounds {
                    state.rounds.insert(round.id, round.clone());
                }
                state.participants.extend(snapshot.participants.iter().cloned());
                for (round_id, amount) in &snapshot.allocations {
                    state.allocations.insert(
                        *round_id,
                        IncomeAllocation {
                            round_id: *round_id,
                            order_id: snapshot.order.id,
                            amount: amount.clone(),
                            entered_by: Uuid::nil(),
                            entered_at: None,
                        },
                    );
                }
            })
            .await;
    }
}
