// Condition Evaluator
//
// Thin layer over the external condition store. The one rule owned here:
// a missing product or customer id makes the discount ineligible instead of
// raising an error (custom line items and guest carts have none).

use std::sync::Arc;
use uuid::Uuid;

use crate::discounts::collaborators::{ConditionStore, CustomerLookup, ProductLookup};
use crate::error::DiscountResult;

#[derive(Clone)]
pub struct ConditionEvaluator {
    store: Arc<dyn ConditionStore>,
    products: Arc<dyn ProductLookup>,
    customers: Arc<dyn CustomerLookup>,
}

impl ConditionEvaluator {
    pub fn new(
        store: Arc<dyn ConditionStore>,
        products: Arc<dyn ProductLookup>,
        customers: Arc<dyn CustomerLookup>,
    ) -> Self {
        Self {
            store,
            products,
            customers,
        }
    }

    /// Whether the rule's product conditions accept the product
    ///
    /// Unknown products fail with NotFound from the product lookup.
    pub async fn is_valid_for_product(
        &self,
        rule_id: Uuid,
        product_id: Option<Uuid>,
    ) -> DiscountResult<bool> {
        let Some(product_id) = product_id else {
            tracing::debug!("No product id for rule {}, treating as ineligible", rule_id);
            return Ok(false);
        };

        let product = self.products.retrieve_with_tags(product_id).await?;
        self.store.is_valid_for_product(rule_id, product.id).await
    }

    /// Whether the rule's customer-group conditions accept the customer
    pub async fn can_apply_for_customer(
        &self,
        rule_id: Uuid,
        customer_id: Option<Uuid>,
    ) -> DiscountResult<bool> {
        let Some(customer_id) = customer_id else {
            return Ok(false);
        };

        let customer = self.customers.retrieve_with_groups(customer_id).await?;
        self.store.can_apply_for_customer(rule_id, customer.id).await
    }
}
