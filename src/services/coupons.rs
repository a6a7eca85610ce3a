use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::entities::coupon::{self, DiscountType, Entity as CouponEntity};
use crate::errors::ServiceError;

/// Result of evaluating a coupon code against a subtotal.
#[derive(Debug, Clone, Serialize)]
pub struct CouponEvaluation {
    pub is_valid: bool,
    pub discount_amount: Decimal,
    #[serde(skip)]
    pub coupon: Option<coupon::Model>,
}

impl CouponEvaluation {
    fn invalid() -> Self {
        Self {
            is_valid: false,
            discount_amount: Decimal::ZERO,
            coupon: None,
        }
    }
}

/// Coupon lookup and discount computation. Pure read from checkout's
/// perspective; only the usage counter moves, after a successful order.
#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Validates a coupon code and computes the discount for a subtotal.
    /// Unknown, inactive, expired, or exhausted codes evaluate to
    /// `(is_valid=false, discount=0)` rather than an error.
    #[instrument(skip(self))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
    ) -> Result<CouponEvaluation, ServiceError> {
        let Some(coupon) = self.find_active_coupon(code).await? else {
            return Ok(CouponEvaluation::invalid());
        };

        let discount_amount = calculate_discount(&coupon, subtotal);

        Ok(CouponEvaluation {
            is_valid: true,
            discount_amount,
            coupon: Some(coupon),
        })
    }

    /// Finds a coupon that is active, inside its validity window, and under
    /// its usage limit.
    pub async fn find_active_coupon(
        &self,
        code: &str,
    ) -> Result<Option<coupon::Model>, ServiceError> {
        let now = Utc::now();

        let coupon = CouponEntity::find()
            .filter(coupon::Column::Code.eq(code))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(coupon::Column::StartsAt.lte(now))
            .filter(coupon::Column::ExpiresAt.gte(now))
            .one(&*self.db)
            .await?;

        if let Some(ref c) = coupon {
            if let Some(limit) = c.usage_limit {
                if c.usage_count >= limit {
                    warn!("Coupon {} has reached its usage limit", code);
                    return Ok(None);
                }
            }
        }

        Ok(coupon)
    }

    /// Increments the usage counter after a successful order.
    #[instrument(skip(self))]
    pub async fn increment_usage_count(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let coupon = CouponEntity::find_by_id(coupon_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", coupon_id)))?;

        let current = coupon.usage_count;
        let mut active: coupon::ActiveModel = coupon.into();
        active.usage_count = Set(current + 1);
        active.updated_at = Set(Some(Utc::now()));
        active.update(&*self.db).await?;

        Ok(())
    }
}

/// Computes the discount a coupon grants against a subtotal, capped so the
/// discount never exceeds the subtotal and never goes negative.
pub fn calculate_discount(coupon: &coupon::Model, subtotal: Decimal) -> Decimal {
    let raw = match DiscountType::from_str(&coupon.discount_type) {
        Some(DiscountType::Percentage) => subtotal * coupon.discount_value / Decimal::from(100),
        Some(DiscountType::Fixed) => coupon.discount_value,
        None => {
            debug!("Unknown discount type '{}'", coupon.discount_type);
            return Decimal::ZERO;
        }
    };

    let capped = match coupon.max_discount_amount {
        Some(max) => raw.min(max),
        None => raw,
    };

    capped.max(Decimal::ZERO).min(subtotal.max(Decimal::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn coupon_model(discount_type: DiscountType, value: Decimal) -> coupon::Model {
        coupon::Model {
            id: Uuid::new_v4(),
            code: "TEST".to_string(),
            discount_type: discount_type.as_str().to_string(),
            discount_value: value,
            max_discount_amount: None,
            usage_limit: None,
            usage_count: 0,
            starts_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::days(30),
            is_active: true,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    #[test]
    fn test_percentage_discount() {
        let coupon = coupon_model(DiscountType::Percentage, dec!(10));
        assert_eq!(calculate_discount(&coupon, dec!(200000)), dec!(20000));
    }

    #[test]
    fn test_fixed_discount() {
        let coupon = coupon_model(DiscountType::Fixed, dec!(50000));
        assert_eq!(calculate_discount(&coupon, dec!(200000)), dec!(50000));
    }

    #[test]
    fn test_fixed_discount_capped_at_subtotal() {
        let coupon = coupon_model(DiscountType::Fixed, dec!(500000));
        assert_eq!(calculate_discount(&coupon, dec!(200000)), dec!(200000));
    }

    #[test]
    fn test_max_discount_cap() {
        let mut coupon = coupon_model(DiscountType::Percentage, dec!(50));
        coupon.max_discount_amount = Some(dec!(30000));
        assert_eq!(calculate_discount(&coupon, dec!(200000)), dec!(30000));
    }

    #[test]
    fn test_unknown_type_yields_zero() {
        let mut coupon = coupon_model(DiscountType::Fixed, dec!(1000));
        coupon.discount_type = "bogo".to_string();
        assert_eq!(calculate_discount(&coupon, dec!(200000)), Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn discount_never_exceeds_subtotal(
            subtotal_units in 0i64..1_000_000_000,
            value_units in 0i64..1_000_000_000,
            percentage in proptest::bool::ANY,
        ) {
            let subtotal = Decimal::from(subtotal_units);
            let (discount_type, value) = if percentage {
                (DiscountType::Percentage, Decimal::from(value_units % 200))
            } else {
                (DiscountType::Fixed, Decimal::from(value_units))
            };
            let coupon = coupon_model(discount_type, value);

            let discount = calculate_discount(&coupon, subtotal);
            prop_assert!(discount >= Decimal::ZERO);
            prop_assert!(discount <= subtotal);
        }
    }
}
