// Collaborator interfaces
//
// Lookups the engine consumes but does not own. Implementations live with the
// region, product, customer and condition services. They are read-only; an
// error from any of them aborts the enclosing discount transaction.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::discounts::models::Cart;
use crate::error::DiscountResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: Uuid,
    pub name: String,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub title: String,
    pub tag_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub email: String,
    pub group_ids: Vec<Uuid>,
}

/// Region lookup; fails with NotFound for unknown ids
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RegionLookup: Send + Sync {
    async fn retrieve(&self, region_id: Uuid) -> DiscountResult<Region>;
}

/// Product lookup with tags loaded; fails with NotFound for unknown ids
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn retrieve_with_tags(&self, product_id: Uuid) -> DiscountResult<Product>;
}

/// Customer lookup with groups loaded; fails with NotFound for unknown ids
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CustomerLookup: Send + Sync {
    async fn retrieve_with_groups(&self, customer_id: Uuid) -> DiscountResult<Customer>;
}

/// External store that owns condition matching
///
/// Matching reads the conditions saved on the rule; the store never writes them.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConditionStore: Send + Sync {
    async fn is_valid_for_product(&self, rule_id: Uuid, product_id: Uuid) -> DiscountResult<bool>;

    async fn can_apply_for_customer(&self, rule_id: Uuid, customer_id: Uuid) -> DiscountResult<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubtotalOptions {
    /// Leave out line items that do not allow discounts
    pub exclude_non_discounts: bool,
}

/// Source of the cart subtotal used for total allocation
#[cfg_attr(test, automock)]
pub trait TotalsCalculator: Send + Sync {
    /// Subtotal in minor units
    fn subtotal(&self, cart: &Cart, options: SubtotalOptions) -> i64;
}

/// Subtotal as the plain sum of `unit_price × quantity`
#[derive(Debug, Clone, Copy, Default)]
pub struct LineItemTotals;

impl TotalsCalculator for LineItemTotals {
    fn subtotal(&self, cart: &Cart, options: SubtotalOptions) -> i64 {
        cart.items
            .iter()
            .filter(|item| !options.exclude_non_discounts || item.allow_discounts)
            .map(|item| item.full_price())
            .fold(0i64, |acc, price| acc.saturating_add(price))
    }
}
