// Eligibility Chain
//
// Ordered checks deciding whether a discount may be applied to a cart right
// now. The first failing check is the one reported; nothing after it runs,
// including its collaborator calls.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::discounts::conditions::ConditionEvaluator;
use crate::discounts::models::{Cart, Discount};
use crate::error::{DiscountError, DiscountResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityCheck {
    UsageLimit,
    NotStarted,
    Expired,
    Disabled,
    Region,
    Customer,
}

/// Evaluation order of the chain
pub const ELIGIBILITY_CHECKS: [EligibilityCheck; 6] = [
    EligibilityCheck::UsageLimit,
    EligibilityCheck::NotStarted,
    EligibilityCheck::Expired,
    EligibilityCheck::Disabled,
    EligibilityCheck::Region,
    EligibilityCheck::Customer,
];

impl EligibilityCheck {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EligibilityCheck::Region => ErrorKind::InvalidData,
            _ => ErrorKind::NotAllowed,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            EligibilityCheck::UsageLimit => "Discount has been used maximum allowed times",
            EligibilityCheck::NotStarted => "Discount is not valid yet",
            EligibilityCheck::Expired => "Discount is expired",
            EligibilityCheck::Disabled => "The discount code is disabled",
            EligibilityCheck::Region => "The discount is not available in current region",
            EligibilityCheck::Customer => "Discount is not valid for customer",
        }
    }

    /// Checks answered from the discount record alone
    fn passes_locally(&self, discount: &Discount, now: DateTime<Utc>) -> Option<bool> {
        match self {
            EligibilityCheck::UsageLimit => Some(
                discount
                    .usage_limit
                    .map_or(true, |limit| discount.usage_count < limit),
            ),
            EligibilityCheck::NotStarted => Some(now >= discount.starts_at),
            EligibilityCheck::Expired => Some(discount.ends_at.map_or(true, |ends_at| now <= ends_at)),
            EligibilityCheck::Disabled => Some(!discount.is_disabled),
            EligibilityCheck::Region | EligibilityCheck::Customer => None,
        }
    }
}

/// The check that blocked a discount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ineligible {
    pub check: EligibilityCheck,
}

impl Ineligible {
    pub fn kind(&self) -> ErrorKind {
        self.check.kind()
    }

    pub fn reason(&self) -> &'static str {
        self.check.reason()
    }
}

impl std::fmt::Display for Ineligible {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

impl From<Ineligible> for DiscountError {
    fn from(ineligible: Ineligible) -> Self {
        let reason = ineligible.reason().to_string();
        match ineligible.kind() {
            ErrorKind::InvalidData => DiscountError::InvalidData(reason),
            _ => DiscountError::NotAllowed(reason),
        }
    }
}

#[derive(Clone)]
pub struct EligibilityChain {
    conditions: ConditionEvaluator,
}

impl EligibilityChain {
    pub fn new(conditions: ConditionEvaluator) -> Self {
        Self { conditions }
    }

    /// Run the chain and report the first failing check
    ///
    /// `effective_regions` resolves the region set to test the cart against
    /// (the template's for a dynamic child). It is only awaited when the
    /// region check is reached.
    pub async fn first_failure<F>(
        &self,
        discount: &Discount,
        cart: &Cart,
        now: DateTime<Utc>,
        effective_regions: F,
    ) -> DiscountResult<Option<Ineligible>>
    where
        F: Future<Output = DiscountResult<Vec<Uuid>>> + Send,
    {
        let mut effective_regions = Some(effective_regions);

        for check in ELIGIBILITY_CHECKS {
            let passed = match check.passes_locally(discount, now) {
                Some(passed) => passed,
                None => match check {
                    EligibilityCheck::Region => match effective_regions.take() {
                        Some(regions) => regions.await?.contains(&cart.region_id),
                        None => false,
                    },
                    _ => self.customer_allowed(discount, cart).await?,
                },
            };

            if !passed {
                tracing::debug!(
                    "Discount {} failed eligibility check {:?} for cart {}",
                    discount.code,
                    check,
                    cart.id
                );
                return Ok(Some(Ineligible { check }));
            }
        }

        Ok(None)
    }

    /// Run the chain and turn the first failure into an error
    pub async fn check_or_throw<F>(
        &self,
        discount: &Discount,
        cart: &Cart,
        now: DateTime<Utc>,
        effective_regions: F,
    ) -> DiscountResult<()>
    where
        F: Future<Output = DiscountResult<Vec<Uuid>>> + Send,
    {
        match self
            .first_failure(discount, cart, now, effective_regions)
            .await?
        {
            Some(ineligible) => Err(ineligible.into()),
            None => Ok(()),
        }
    }

    // Guest carts skip the customer check entirely
    async fn customer_allowed(&self, discount: &Discount, cart: &Cart) -> DiscountResult<bool> {
        match cart.customer_id {
            Some(customer_id) => {
                self.conditions
                    .can_apply_for_customer(discount.rule_id(), Some(customer_id))
                    .await
            }
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discounts::collaborators::{
        Customer, MockConditionStore, MockCustomerLookup, MockProductLookup,
    };
    use crate::discounts::models::{DiscountRule, DiscountRuleType, Metadata};
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn chain(store: MockConditionStore, customers: MockCustomerLookup) -> EligibilityChain {
        EligibilityChain::new(ConditionEvaluator::new(
            Arc::new(store),
            Arc::new(MockProductLookup::new()),
            Arc::new(customers),
        ))
    }

    fn idle_chain() -> EligibilityChain {
        let mut store = MockConditionStore::new();
        store.expect_can_apply_for_customer().times(0);
        let mut customers = MockCustomerLookup::new();
        customers.expect_retrieve_with_groups().times(0);
        chain(store, customers)
    }

    fn discount(region_id: Uuid) -> Discount {
        let now = Utc::now();
        Discount {
            id: Uuid::new_v4(),
            code: "WELCOME".to_string(),
            is_dynamic: false,
            is_disabled: false,
            starts_at: now - Duration::days(1),
            ends_at: None,
            usage_limit: None,
            usage_count: 0,
            valid_duration: None,
            parent_discount_id: None,
            regions: vec![region_id],
            rule: DiscountRule {
                id: Uuid::new_v4(),
                rule_type: DiscountRuleType::Percentage,
                value: dec!(10),
                allocation: None,
                description: None,
                conditions: vec![],
            },
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn cart(region_id: Uuid, customer_id: Option<Uuid>) -> Cart {
        Cart {
            id: Uuid::new_v4(),
            region_id,
            customer_id,
            items: vec![],
        }
    }

    async fn own_regions(discount: &Discount) -> DiscountResult<Vec<Uuid>> {
        Ok(discount.regions.clone())
    }

    #[test]
    fn test_check_order_is_fixed() {
        assert_eq!(ELIGIBILITY_CHECKS[0], EligibilityCheck::UsageLimit);
        assert_eq!(ELIGIBILITY_CHECKS[4], EligibilityCheck::Region);
        assert_eq!(ELIGIBILITY_CHECKS[5], EligibilityCheck::Customer);
    }

    #[test]
    fn test_ineligible_into_error() {
        let err: DiscountError = Ineligible { check: EligibilityCheck::Region }.into();
        assert!(matches!(err, DiscountError::InvalidData(ref msg) if msg == "The discount is not available in current region"));

        let err: DiscountError = Ineligible { check: EligibilityCheck::Expired }.into();
        assert!(matches!(err, DiscountError::NotAllowed(ref msg) if msg == "Discount is expired"));
    }

    #[tokio::test]
    async fn test_eligible_guest_cart() {
        let region_id = Uuid::new_v4();
        let discount = discount(region_id);
        let result = idle_chain()
            .first_failure(&discount, &cart(region_id, None), Utc::now(), own_regions(&discount))
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_usage_limit_reported_first() {
        let region_id = Uuid::new_v4();
        let mut discount = discount(region_id);
        discount.usage_limit = Some(3);
        discount.usage_count = 3;
        discount.is_disabled = true;

        let result = idle_chain()
            .first_failure(&discount, &cart(Uuid::new_v4(), None), Utc::now(), own_regions(&discount))
            .await
            .unwrap();
        assert_eq!(result.unwrap().check, EligibilityCheck::UsageLimit);
    }

    #[tokio::test]
    async fn test_not_started() {
        let region_id = Uuid::new_v4();
        let mut discount = discount(region_id);
        discount.starts_at = Utc::now() + Duration::days(2);

        let result = idle_chain()
            .first_failure(&discount, &cart(region_id, None), Utc::now(), own_regions(&discount))
            .await
            .unwrap();
        assert_eq!(result.unwrap().reason(), "Discount is not valid yet");
    }

    #[tokio::test]
    async fn test_expired_wins_over_disabled() {
        let region_id = Uuid::new_v4();
        let mut discount = discount(region_id);
        discount.starts_at = Utc::now() - Duration::days(10);
        discount.ends_at = Some(Utc::now() - Duration::days(1));
        discount.is_disabled = true;

        let err = idle_chain()
            .check_or_throw(&discount, &cart(region_id, None), Utc::now(), own_regions(&discount))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscountError::NotAllowed(ref msg) if msg == "Discount is expired"));
    }

    #[tokio::test]
    async fn test_disabled() {
        let region_id = Uuid::new_v4();
        let mut discount = discount(region_id);
        discount.is_disabled = true;

        let result = idle_chain()
            .first_failure(&discount, &cart(region_id, None), Utc::now(), own_regions(&discount))
            .await
            .unwrap();
        assert_eq!(result.unwrap().check, EligibilityCheck::Disabled);
    }

    #[tokio::test]
    async fn test_wrong_region_is_invalid_data() {
        let discount = discount(Uuid::new_v4());
        let err = idle_chain()
            .check_or_throw(&discount, &cart(Uuid::new_v4(), None), Utc::now(), own_regions(&discount))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscountError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_effective_regions_override_own() {
        let template_region = Uuid::new_v4();
        let mut child = discount(Uuid::new_v4());
        child.regions.clear();
        child.parent_discount_id = Some(Uuid::new_v4());

        let result = idle_chain()
            .first_failure(&child, &cart(template_region, None), Utc::now(), async move {
                Ok::<_, DiscountError>(vec![template_region])
            })
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_region_resolution_skipped_after_earlier_failure() {
        let mut discount = discount(Uuid::new_v4());
        discount.is_disabled = true;

        let result = idle_chain()
            .first_failure(&discount, &cart(Uuid::new_v4(), None), Utc::now(), async {
                Err::<Vec<Uuid>, _>(DiscountError::NotFound("should never be resolved".to_string()))
            })
            .await
            .unwrap();
        assert_eq!(result.unwrap().check, EligibilityCheck::Disabled);
    }

    #[tokio::test]
    async fn test_customer_rejected() {
        let region_id = Uuid::new_v4();
        let discount = discount(region_id);

        let mut customers = MockCustomerLookup::new();
        customers.expect_retrieve_with_groups().times(1).returning(|id| {
            Ok(Customer {
                id,
                email: "guest@example.com".to_string(),
                group_ids: vec![],
            })
        });
        let mut store = MockConditionStore::new();
        store
            .expect_can_apply_for_customer()
            .times(1)
            .returning(|_, _| Ok(false));

        let err = chain(store, customers)
            .check_or_throw(
                &discount,
                &cart(region_id, Some(Uuid::new_v4())),
                Utc::now(),
                own_regions(&discount),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DiscountError::NotAllowed(ref msg) if msg == "Discount is not valid for customer"));
    }

    #[tokio::test]
    async fn test_customer_lookup_skipped_after_region_failure() {
        let discount = discount(Uuid::new_v4());
        let result = idle_chain()
            .first_failure(
                &discount,
                &cart(Uuid::new_v4(), Some(Uuid::new_v4())),
                Utc::now(),
                own_regions(&discount),
            )
            .await
            .unwrap();
        assert_eq!(result.unwrap().check, EligibilityCheck::Region);
    }
}
