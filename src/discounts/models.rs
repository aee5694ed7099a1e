use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Free-form key/value metadata attached to a discount
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// How a rule's value is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscountRuleType {
    /// Value is a percentage of the line item price (0..=100)
    Percentage,
    /// Value is an amount in minor currency units
    Fixed,
}

impl DiscountRuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountRuleType::Percentage => "percentage",
            DiscountRuleType::Fixed => "fixed",
        }
    }
}

impl std::fmt::Display for DiscountRuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DiscountRuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "percentage" => Ok(DiscountRuleType::Percentage),
            "fixed" => Ok(DiscountRuleType::Fixed),
            _ => Err(format!("Invalid discount rule type: {}", s)),
        }
    }
}

/// Where a fixed amount is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AllocationType {
    /// The amount is taken off every unit of every line item
    Item,
    /// The amount is spread over the cart proportionally to each item's share
    Total,
}

impl AllocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationType::Item => "item",
            AllocationType::Total => "total",
        }
    }
}

impl std::fmt::Display for AllocationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource a condition is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Products,
    ProductTypes,
    ProductCollections,
    ProductTags,
    CustomerGroups,
}

impl ConditionType {
    /// Whether the condition constrains customers rather than products
    pub fn is_customer_scoped(&self) -> bool {
        matches!(self, ConditionType::CustomerGroups)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    In,
    NotIn,
}

/// A product- or customer-group-scoped predicate attached to a rule
///
/// Matching is answered by the external condition store; the engine only
/// carries the definition around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountCondition {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub operator: ConditionOperator,
    pub resource_ids: Vec<Uuid>,
}

/// Pricing rule of a discount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountRule {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub rule_type: DiscountRuleType,
    pub value: Decimal,
    pub allocation: Option<AllocationType>,
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<DiscountCondition>,
}

/// A promotional code
///
/// Dynamic children point at their template through `parent_discount_id`;
/// they never hold the parent itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: Uuid,
    pub code: String,
    pub is_dynamic: bool,
    pub is_disabled: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub valid_duration: Option<String>,
    pub parent_discount_id: Option<Uuid>,
    pub regions: Vec<Uuid>,
    pub rule: DiscountRule,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Discount {
    pub fn rule_id(&self) -> Uuid {
        self.rule.id
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_region(&self, region_id: Uuid) -> bool {
        self.regions.contains(&region_id)
    }

    /// Dynamic child spawned from a template
    pub fn is_dynamic_child(&self) -> bool {
        self.parent_discount_id.is_some()
    }
}

/// Normalize a discount code the way it is stored
pub fn normalize_code(code: &str) -> String {
    code.to_uppercase()
}

/// Condition as supplied by callers; `id` is kept when updating an existing one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertConditionInput {
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub condition_type: ConditionType,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub resource_ids: Vec<Uuid>,
}

impl UpsertConditionInput {
    pub fn into_condition(self) -> DiscountCondition {
        DiscountCondition {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            condition_type: self.condition_type,
            operator: self.operator,
            resource_ids: self.resource_ids,
        }
    }
}

/// Rule data for creating a discount
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDiscountRuleInput {
    #[serde(rename = "type")]
    pub rule_type: DiscountRuleType,
    pub value: Decimal,
    pub allocation: Option<AllocationType>,
    pub description: Option<String>,
    #[serde(default)]
    pub conditions: Vec<UpsertConditionInput>,
}

/// Data needed to create a discount
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDiscountInput {
    #[validate(length(min = 1, message = "Discount must have a code"))]
    pub code: String,
    #[serde(default)]
    pub is_dynamic: bool,
    #[serde(default)]
    pub is_disabled: bool,
    /// Defaults to the moment of creation
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "Usage limit must be at least 1"))]
    pub usage_limit: Option<i32>,
    pub valid_duration: Option<String>,
    #[serde(default)]
    pub regions: Vec<Uuid>,
    pub rule: CreateDiscountRuleInput,
    pub metadata: Option<Metadata>,
}

/// Partial rule update; only present fields are merged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateDiscountRuleInput {
    #[serde(rename = "type")]
    pub rule_type: Option<DiscountRuleType>,
    pub value: Option<Decimal>,
    pub allocation: Option<AllocationType>,
    pub description: Option<String>,
    pub conditions: Option<Vec<UpsertConditionInput>>,
}

impl UpdateDiscountRuleInput {
    /// True when the patch touches the rule itself, not only its conditions
    pub fn touches_rule(&self) -> bool {
        self.rule_type.is_some()
            || self.value.is_some()
            || self.allocation.is_some()
            || self.description.is_some()
    }
}

/// Partial discount update
///
/// Nullable columns use `Option<Option<T>>`: absent leaves the field alone,
/// `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateDiscountInput {
    #[validate(length(min = 1, message = "Discount must have a code"))]
    pub code: Option<String>,
    pub is_dynamic: Option<bool>,
    pub is_disabled: Option<bool>,
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "double_option")]
    pub ends_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "double_option")]
    pub usage_limit: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub valid_duration: Option<Option<String>>,
    pub regions: Option<Vec<Uuid>>,
    pub rule: Option<UpdateDiscountRuleInput>,
    pub metadata: Option<Metadata>,
}

/// Data for spawning a child code from a dynamic template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDynamicDiscountInput {
    pub code: String,
    /// Overridden by the parent's `valid_duration` when the parent has one
    pub ends_at: Option<DateTime<Utc>>,
    pub metadata: Option<Metadata>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A cart line item as seen by the calculator
///
/// Prices are integer minor units (e.g. cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    /// Absent for custom (non-catalog) line items
    pub product_id: Option<Uuid>,
    pub unit_price: i64,
    pub quantity: u32,
    pub allow_discounts: bool,
}

impl LineItem {
    /// `unit_price × quantity`, saturating on overflow
    pub fn full_price(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    pub id: Uuid,
    pub region_id: Uuid,
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

/// Structured filters for listing discounts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscountFilter {
    /// Free-text search, matched case-insensitively as a substring of the code
    pub q: Option<String>,
    pub code: Option<String>,
    pub is_dynamic: Option<bool>,
    pub is_disabled: Option<bool>,
    pub parent_discount_id: Option<Uuid>,
}

impl DiscountFilter {
    /// Evaluate the filter against a discount; soft-deleted records never match
    pub fn matches(&self, discount: &Discount) -> bool {
        if discount.is_deleted() {
            return false;
        }
        if let Some(ref q) = self.q {
            if !discount.code.to_uppercase().contains(&q.to_uppercase()) {
                return false;
            }
        }
        if let Some(ref code) = self.code {
            if discount.code != normalize_code(code) {
                return false;
            }
        }
        if let Some(is_dynamic) = self.is_dynamic {
            if discount.is_dynamic != is_dynamic {
                return false;
            }
        }
        if let Some(is_disabled) = self.is_disabled {
            if discount.is_disabled != is_disabled {
                return false;
            }
        }
        if let Some(parent_id) = self.parent_discount_id {
            if discount.parent_discount_id != Some(parent_id) {
                return false;
            }
        }
        true
    }
}

/// Offset pagination; results are ordered by `created_at` descending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub skip: u32,
    pub take: u32,
}

impl Pagination {
    pub fn new(skip: u32, take: u32) -> Self {
        Self { skip, take }
    }

    /// Page used by `list` when the caller supplies none
    pub fn list_default() -> Self {
        Self::new(0, 10)
    }

    /// Page used by `list_and_count` when the caller supplies none
    pub fn count_default() -> Self {
        Self::new(0, 20)
    }
}
