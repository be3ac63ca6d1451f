// service/freeze_window.rs
use chrono::{DateTime, Duration, Utc};

use crate::{
    config::Config,
    models::dispatchmodel::{OrderSnapshot, ProductCategory},
    service::error::ServiceError,
};

#[derive(Debug, Clone)]
pub struct FreezePolicy {
    pub promotional_days: i64,
    pub standard_days: i64,
    /// Use the round's acceptance time when the completion time is missing.
    pub allow_acceptance_fallback: bool,
}

impl Default for FreezePolicy {
    fn default() -> Self {
        Self {
            promotional_days: 3,
            standard_days: 7,
            allow_acceptance_fallback: false,
        }
    }
}

impl FreezePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            promotional_days: config.freeze_promotional_days,
            standard_days: config.freeze_standard_days,
            allow_acceptance_fallback: config.freeze_allow_acceptance_fallback,
        }
    }

    pub fn window(&self, category: ProductCategory) -> Duration {
        if category.is_promotional() {
            Duration::days(self.promotional_days)
        } else {
            Duration::days(self.standard_days)
        }
    }

    pub fn unlock_at(
        &self,
        category: ProductCategory,
        completed_at: Option<DateTime<Utc>>,
        accepted_at: Option<DateTime<Utc>>,
    ) -> Result<DateTime<Utc>, ServiceError> {
        let base = match (completed_at, accepted_at) {
            (Some(completed), _) => completed,
            (None, Some(accepted)) if self.allow_acceptance_fallback => {
                tracing::warn!(
                    "completion time missing, unlocking from acceptance time {}",
                    accepted
                );
                accepted
            }
            _ => {
                return Err(ServiceError::consistency(
                    "cannot compute unlock time without a completion timestamp",
                ))
            }
        };

        Ok(base + self.window(category))
    }

    /// Unlock time for an order's earnings, or `None` while no round has completed.
    pub fn unlock_at_for_order(
        &self,
        snapshot: &OrderSnapshot,
    ) -> Result<Option<DateTime<Utc>>, ServiceError> {
        let Some(round) = snapshot.completed_round() else {
            return Ok(None);
        };

        self.unlock_at(snapshot.product.category, round.completed_at, round.accepted_at)
            .map(Some)
            .map_err(|e| match e {
                ServiceError::Consistency(_) => ServiceError::consistency(format!(
                    "completed round {} of order {} has no completion timestamp",
                    round.id, snapshot.order.id
                )),
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn completed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_promotional_window_is_three_days() {
        let policy = FreezePolicy::default();
        let unlock = policy
            .unlock_at(ProductCategory::Promotional, Some(completed()), None)
            .unwrap();
        assert_eq!(unlock, completed() + Duration::days(3));

        let unlock = policy
            .unlock_at(ProductCategory::Trial, Some(completed()), None)
            .unwrap();
        assert_eq!(unlock, completed() + Duration::days(3));
    }

    #[test]
    fn test_standard_window_is_seven_days() {
        let unlock = FreezePolicy::default()
            .unlock_at(ProductCategory::Standard, Some(completed()), None)
            .unwrap();
        assert_eq!(unlock, completed() + Duration::days(7));
    }

    #[test]
    fn test_missing_completion_is_consistency_error() {
        let err = FreezePolicy::default()
            .unlock_at(ProductCategory::Standard, None, Some(completed()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::Consistency(_)));
    }

    #[test]
    fn test_acceptance_fallback_when_enabled() {
        let policy = FreezePolicy {
            allow_acceptance_fallback: true,
            ..FreezePolicy::default()
        };
        let unlock = policy
            .unlock_at(ProductCategory::Standard, None, Some(completed()))
            .unwrap();
        assert_eq!(unlock, completed() + Duration::days(7));
    }
}
