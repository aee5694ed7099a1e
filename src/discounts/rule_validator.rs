// Rule Validator
//
// Pure checks on a discount's pricing rule and on the invariants that tie the
// rule to the rest of the discount. No I/O.

use crate::discounts::models::DiscountRuleType;
use crate::error::{DiscountError, DiscountResult};
use rust_decimal::Decimal;

/// Maximum number of regions a fixed-amount discount may be attached to
pub const MAX_FIXED_DISCOUNT_REGIONS: usize = 1;

/// Validate the value of a rule against its type
///
/// Returns the value unchanged so callers can validate inline.
pub fn validate_rule_value(rule_type: DiscountRuleType, value: Decimal) -> DiscountResult<Decimal> {
    if value < Decimal::ZERO {
        return Err(DiscountError::InvalidData(
            "Discount value must be non-negative".to_string(),
        ));
    }

    match rule_type {
        DiscountRuleType::Percentage => {
            if value > Decimal::ONE_HUNDRED {
                return Err(DiscountError::InvalidData(
                    "Discount value above 100 is not allowed when type is percentage".to_string(),
                ));
            }
        }
        DiscountRuleType::Fixed => {}
    }

    Ok(value)
}

/// Enforce "fixed discount ⇒ at most one region"
pub fn ensure_region_cardinality(rule_type: DiscountRuleType, region_count: usize) -> DiscountResult<()> {
    if rule_type == DiscountRuleType::Fixed && region_count > MAX_FIXED_DISCOUNT_REGIONS {
        return Err(DiscountError::InvalidData(
            "Fixed discounts can have one region".to_string(),
        ));
    }
    Ok(())
}
