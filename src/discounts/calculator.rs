// Discount Calculator
//
// Computes the adjustment a discount rule grants a single line item.
// All amounts are integer minor units; intermediate math uses exact
// fixed-point decimals and one rounding rule (half-up).

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::discounts::models::{AllocationType, DiscountRule, DiscountRuleType, LineItem};

/// Service for computing per-line-item adjustments
pub struct DiscountCalculator;

impl DiscountCalculator {
    /// Whether computing an adjustment for `rule` needs the eligible cart subtotal
    pub fn needs_subtotal(rule: &DiscountRule) -> bool {
        rule.rule_type == DiscountRuleType::Fixed && rule.allocation == Some(AllocationType::Total)
    }

    /// Adjustment for one line item
    ///
    /// # Arguments
    /// * `rule` - Pricing rule of the discount
    /// * `item` - Line item being discounted
    /// * `eligible_subtotal` - Cart subtotal over discountable items; only read
    ///   for fixed rules allocated over the total
    ///
    /// # Returns
    /// Adjustment in minor units, never negative and never above `unit_price × quantity`
    pub fn adjustment_for(rule: &DiscountRule, item: &LineItem, eligible_subtotal: i64) -> i64 {
        if !item.allow_discounts {
            return 0;
        }

        let full_price = item.full_price().max(0);
        let full = Decimal::from(full_price);

        let adjustment = match (rule.rule_type, rule.allocation) {
            (DiscountRuleType::Percentage, _) => full
                .checked_mul(rule.value)
                .map(|amount| amount / Decimal::ONE_HUNDRED)
                .unwrap_or(full),
            (DiscountRuleType::Fixed, Some(AllocationType::Total)) => {
                Self::proportional_share(rule.value, full_price, eligible_subtotal)
            }
            (DiscountRuleType::Fixed, _) => rule
                .value
                .checked_mul(Decimal::from(item.quantity))
                .unwrap_or(full),
        };

        let rounded = round_half_up(adjustment).max(Decimal::ZERO);

        // A discount never exceeds the item's own price
        rounded.min(full).to_i64().unwrap_or(full_price)
    }

    /// Share of a flat amount owed by one item, before rounding
    ///
    /// `min(value, subtotal) × item_total / subtotal`. Summed over every
    /// eligible item this equals `min(value, subtotal)` up to rounding.
    fn proportional_share(value: Decimal, item_total: i64, eligible_subtotal: i64) -> Decimal {
        if eligible_subtotal <= 0 {
            return Decimal::ZERO;
        }

        let subtotal = Decimal::from(eligible_subtotal);
        let nominator = value.min(subtotal);
        let item_total = Decimal::from(item_total);

        match nominator.checked_mul(item_total) {
            Some(product) => product / subtotal,
            None => nominator * (item_total / subtotal),
        }
    }

    /// Sum of adjustments over every item of a cart
    pub fn total_adjustment(rule: &DiscountRule, items: &[LineItem], eligible_subtotal: i64) -> i64 {
        items
            .iter()
            .map(|item| Self::adjustment_for(rule, item, eligible_subtotal))
            .fold(0i64, |acc, amount| acc.saturating_add(amount))
    }
}

/// Round to a whole minor unit, midpoints away from zero
pub fn round_half_up(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
}
