use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::discounts::calculator::DiscountCalculator;
use crate::discounts::collaborators::{RegionLookup, SubtotalOptions, TotalsCalculator};
use crate::discounts::conditions::ConditionEvaluator;
use crate::discounts::duration::expiry_from;
use crate::discounts::dynamic_codes;
use crate::discounts::eligibility::{EligibilityChain, Ineligible};
use crate::discounts::models::{
    normalize_code, Cart, CreateDiscountInput, CreateDynamicDiscountInput, Discount, DiscountFilter,
    DiscountRule, LineItem, Metadata, Pagination, UpdateDiscountInput,
};
use crate::discounts::regions::{self, resolve_regions};
use crate::discounts::repository::DiscountRepository;
use crate::discounts::rule_validator::{ensure_region_cardinality, validate_rule_value};
use crate::error::{DiscountError, DiscountResult};

/// Orchestrates discount administration and checkout operations
///
/// Mutating operations run in one write transaction from the repository and
/// commit only when every step, collaborator calls included, succeeded.
/// Read operations use a read transaction.
pub struct DiscountService<R: DiscountRepository> {
    repo: R,
    regions: Arc<dyn RegionLookup>,
    conditions: ConditionEvaluator,
    eligibility: EligibilityChain,
    totals: Arc<dyn TotalsCalculator>,
}

impl<R: DiscountRepository> DiscountService<R> {
    /// Create a new DiscountService
    pub fn new(
        repo: R,
        regions: Arc<dyn RegionLookup>,
        conditions: ConditionEvaluator,
        totals: Arc<dyn TotalsCalculator>,
    ) -> Self {
        Self {
            repo,
            regions,
            eligibility: EligibilityChain::new(conditions.clone()),
            conditions,
            totals,
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Create a discount
    ///
    /// # Validation
    /// - Code must be non-empty; it is stored upper-cased
    /// - Percentage values must lie in 0..=100, all values must be non-negative
    /// - A fixed discount may have at most one region
    /// - `valid_duration` must be an ISO 8601 duration that can be applied from now
    /// - `ends_at` must be after `starts_at`
    /// - Every region must exist
    pub async fn create(&self, input: CreateDiscountInput) -> DiscountResult<Discount> {
        input.validate()?;

        let code = required_code(&input.code)?;
        let value = validate_rule_value(input.rule.rule_type, input.rule.value)?;
        let region_ids = distinct(&input.regions);
        ensure_region_cardinality(input.rule.rule_type, region_ids.len())?;
        let now = Utc::now();
        if let Some(ref valid_duration) = input.valid_duration {
            expiry_from(now, valid_duration)?;
        }

        let starts_at = input.starts_at.unwrap_or(now);
        ensure_window(starts_at, input.ends_at)?;

        let mut tx = self.repo.begin().await?;

        let regions = resolve_regions(self.regions.as_ref(), &region_ids).await?;

        let rule = DiscountRule {
            id: Uuid::new_v4(),
            rule_type: input.rule.rule_type,
            value,
            allocation: input.rule.allocation,
            description: input.rule.description,
            conditions: input
                .rule
                .conditions
                .into_iter()
                .map(|condition| condition.into_condition())
                .collect(),
        };

        let discount = Discount {
            id: Uuid::new_v4(),
            code,
            is_dynamic: input.is_dynamic,
            is_disabled: input.is_disabled,
            starts_at,
            ends_at: input.ends_at,
            usage_limit: input.usage_limit,
            usage_count: 0,
            valid_duration: input.valid_duration,
            parent_discount_id: None,
            regions,
            rule,
            metadata: input.metadata.unwrap_or_default(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        self.repo
            .insert(&mut tx, &discount)
            .await
            .map_err(|e| e.into_duplicate(&discount.code))?;

        self.repo.commit(tx).await?;

        tracing::info!("Created discount {} ({})", discount.code, discount.id);
        Ok(discount)
    }

    /// Retrieve a discount by id; soft-deleted discounts are not found
    pub async fn retrieve(&self, id: Uuid) -> DiscountResult<Discount> {
        let mut tx = self.repo.begin_read().await?;
        self.repo.get(&mut tx, id).await
    }

    /// Retrieve a discount by code
    ///
    /// Static discounts win over dynamic children carrying the same text.
    pub async fn retrieve_by_code(&self, code: &str) -> DiscountResult<Discount> {
        let code = normalize_code(code);
        let mut tx = self.repo.begin_read().await?;

        if let Some(discount) = self.repo.find_by_code(&mut tx, &code, false).await? {
            return Ok(discount);
        }
        if let Some(discount) = self.repo.find_by_code(&mut tx, &code, true).await? {
            return Ok(discount);
        }

        tracing::debug!("No discount with code {}", code);
        Err(DiscountError::NotFound(format!(
            "Discount with code {} was not found",
            code
        )))
    }

    /// List discounts, newest first; defaults to the first 10
    pub async fn list(
        &self,
        filter: &DiscountFilter,
        page: Option<Pagination>,
    ) -> DiscountResult<Vec<Discount>> {
        let mut tx = self.repo.begin_read().await?;
        let (discounts, _) = self
            .repo
            .list(&mut tx, filter, page.unwrap_or_else(Pagination::list_default))
            .await?;
        Ok(discounts)
    }

    /// List discounts with the total match count; defaults to the first 20
    pub async fn list_and_count(
        &self,
        filter: &DiscountFilter,
        page: Option<Pagination>,
    ) -> DiscountResult<(Vec<Discount>, u64)> {
        let mut tx = self.repo.begin_read().await?;
        self.repo
            .list(&mut tx, filter, page.unwrap_or_else(Pagination::count_default))
            .await
    }

    /// Apply a partial update
    ///
    /// Only fields present in `update` change. A rule patch is merged field by
    /// field and conditions are upserted by id onto the rule, which is saved in
    /// the same transaction. Metadata is merged key by key and `null` values
    /// remove keys.
    pub async fn update(&self, id: Uuid, update: UpdateDiscountInput) -> DiscountResult<Discount> {
        update.validate()?;

        if let Some(Some(limit)) = update.usage_limit {
            if limit < 1 {
                return Err(DiscountError::InvalidData(
                    "Usage limit must be at least 1".to_string(),
                ));
            }
        }
        let now = Utc::now();
        if let Some(Some(ref valid_duration)) = update.valid_duration {
            expiry_from(now, valid_duration)?;
        }

        let mut tx = self.repo.begin().await?;
        let mut discount = self.repo.get(&mut tx, id).await?;

        let mut type_changed = false;

        if let Some(rule_update) = update.rule {
            let rule = &mut discount.rule;
            if let Some(rule_type) = rule_update.rule_type {
                type_changed = rule_type != rule.rule_type;
                rule.rule_type = rule_type;
            }
            if let Some(value) = rule_update.value {
                rule.value = value;
            }
            if rule_update.rule_type.is_some() || rule_update.value.is_some() {
                validate_rule_value(rule.rule_type, rule.value)?;
            }
            if let Some(allocation) = rule_update.allocation {
                rule.allocation = Some(allocation);
            }
            if let Some(description) = rule_update.description {
                rule.description = Some(description);
            }
            for condition in rule_update.conditions.unwrap_or_default() {
                let condition = condition.into_condition();
                match rule.conditions.iter_mut().find(|c| c.id == condition.id) {
                    Some(existing) => *existing = condition,
                    None => rule.conditions.push(condition),
                }
            }
        }

        match update.regions {
            Some(region_ids) => {
                let region_ids = distinct(&region_ids);
                ensure_region_cardinality(discount.rule.rule_type, region_ids.len())?;
                discount.regions = resolve_regions(self.regions.as_ref(), &region_ids).await?;
            }
            None if type_changed => {
                ensure_region_cardinality(discount.rule.rule_type, discount.regions.len())?;
            }
            None => {}
        }

        if let Some(ref code) = update.code {
            discount.code = required_code(code)?;
        }
        if let Some(is_dynamic) = update.is_dynamic {
            discount.is_dynamic = is_dynamic;
        }
        if let Some(is_disabled) = update.is_disabled {
            discount.is_disabled = is_disabled;
        }
        if let Some(starts_at) = update.starts_at {
            discount.starts_at = starts_at;
        }
        if let Some(ends_at) = update.ends_at {
            discount.ends_at = ends_at;
        }
        if update.starts_at.is_some() || update.ends_at.is_some() {
            ensure_window(discount.starts_at, discount.ends_at)?;
        }
        if let Some(usage_limit) = update.usage_limit {
            discount.usage_limit = usage_limit;
        }
        if let Some(valid_duration) = update.valid_duration {
            discount.valid_duration = valid_duration;
        }
        if let Some(metadata) = update.metadata {
            merge_metadata(&mut discount.metadata, metadata);
        }
        discount.updated_at = now;

        self.repo
            .save(&mut tx, &discount)
            .await
            .map_err(|e| e.into_duplicate(&discount.code))?;

        self.repo.commit(tx).await?;

        tracing::info!("Updated discount {} ({})", discount.code, discount.id);
        Ok(discount)
    }

    /// Soft-delete a discount; absent or already deleted discounts are a no-op
    ///
    /// Dynamic children of a deleted template stay in place.
    pub async fn delete(&self, id: Uuid) -> DiscountResult<()> {
        let mut tx = self.repo.begin().await?;

        match self.repo.find_by_id(&mut tx, id).await? {
            Some(discount) => {
                self.repo.soft_delete(&mut tx, id, Utc::now()).await?;
                self.repo.commit(tx).await?;
                tracing::info!("Deleted discount {} ({})", discount.code, id);
            }
            None => tracing::debug!("Discount {} not found, nothing to delete", id),
        }

        Ok(())
    }

    /// Spawn a child code from a dynamic template
    pub async fn create_dynamic_code(
        &self,
        parent_id: Uuid,
        input: CreateDynamicDiscountInput,
    ) -> DiscountResult<Discount> {
        let mut tx = self.repo.begin().await?;
        let child =
            dynamic_codes::create_dynamic_code(&self.repo, &mut tx, parent_id, input, Utc::now()).await?;
        self.repo.commit(tx).await?;
        Ok(child)
    }

    /// Delete a child code of a dynamic template; absent children are a no-op
    pub async fn delete_dynamic_code(&self, parent_id: Uuid, code: &str) -> DiscountResult<()> {
        let mut tx = self.repo.begin().await?;
        dynamic_codes::delete_dynamic_code(&self.repo, &mut tx, parent_id, code, Utc::now()).await?;
        self.repo.commit(tx).await
    }

    pub async fn add_region(&self, discount_id: Uuid, region_id: Uuid) -> DiscountResult<Discount> {
        let mut tx = self.repo.begin().await?;
        let discount = regions::add_region(
            &self.repo,
            &mut tx,
            self.regions.as_ref(),
            discount_id,
            region_id,
            Utc::now(),
        )
        .await?;
        self.repo.commit(tx).await?;
        Ok(discount)
    }

    pub async fn remove_region(&self, discount_id: Uuid, region_id: Uuid) -> DiscountResult<Discount> {
        let mut tx = self.repo.begin().await?;
        let discount =
            regions::remove_region(&self.repo, &mut tx, discount_id, region_id, Utc::now()).await?;
        self.repo.commit(tx).await?;
        Ok(discount)
    }

    /// Whether the rule's product conditions accept the product
    pub async fn validate_discount_for_product(
        &self,
        rule_id: Uuid,
        product_id: Option<Uuid>,
    ) -> DiscountResult<bool> {
        self.conditions.is_valid_for_product(rule_id, product_id).await
    }

    /// Adjustment in minor units the discount grants a line item of `cart`
    pub async fn calculate_discount_for_line_item(
        &self,
        discount_id: Uuid,
        line_item: &LineItem,
        cart: &Cart,
    ) -> DiscountResult<i64> {
        if !line_item.allow_discounts {
            return Ok(0);
        }

        let discount = self.retrieve(discount_id).await?;

        let eligible_subtotal = if DiscountCalculator::needs_subtotal(&discount.rule) {
            self.totals.subtotal(
                cart,
                SubtotalOptions {
                    exclude_non_discounts: true,
                },
            )
        } else {
            0
        };

        Ok(DiscountCalculator::adjustment_for(
            &discount.rule,
            line_item,
            eligible_subtotal,
        ))
    }

    /// First eligibility check the discount fails for `cart`, if any
    pub async fn check_eligibility(
        &self,
        cart: &Cart,
        discount: &Discount,
    ) -> DiscountResult<Option<Ineligible>> {
        self.check_eligibility_at(cart, discount, Utc::now()).await
    }

    /// Eligibility as of `now`
    pub async fn check_eligibility_at(
        &self,
        cart: &Cart,
        discount: &Discount,
        now: DateTime<Utc>,
    ) -> DiscountResult<Option<Ineligible>> {
        let mut tx = self.repo.begin_read().await?;
        let repo = &self.repo;
        let tx = &mut tx;

        let effective_regions = async move {
            match discount.parent_discount_id {
                Some(parent_id) => repo.get(tx, parent_id).await.map(|parent| parent.regions),
                None => Ok::<_, DiscountError>(discount.regions.clone()),
            }
        };

        self.eligibility
            .first_failure(discount, cart, now, effective_regions)
            .await
    }

    /// Fail with the first eligibility check the discount fails for `cart`
    pub async fn validate_discount_for_cart_or_throw(
        &self,
        cart: &Cart,
        discount: &Discount,
    ) -> DiscountResult<()> {
        match self.check_eligibility(cart, discount).await? {
            Some(ineligible) => {
                tracing::warn!(
                    "Discount {} rejected for cart {}: {}",
                    discount.code,
                    cart.id,
                    ineligible
                );
                Err(ineligible.into())
            }
            None => Ok(()),
        }
    }

    /// Record one redemption
    ///
    /// The increment is conditional on the usage limit at write time, so
    /// concurrent redemptions never push `usage_count` past `usage_limit`.
    pub async fn register_usage(&self, discount_id: Uuid) -> DiscountResult<Discount> {
        let mut tx = self.repo.begin().await?;
        let discount = self.repo.get(&mut tx, discount_id).await?;

        if !self.repo.increment_usage(&mut tx, discount_id).await? {
            tracing::warn!("Usage limit reached for discount {}", discount.code);
            return Err(DiscountError::NotAllowed(
                "Discount has been used maximum allowed times".to_string(),
            ));
        }

        let discount = self.repo.get(&mut tx, discount_id).await?;
        self.repo.commit(tx).await?;

        tracing::info!(
            "Registered usage {} of discount {}",
            discount.usage_count,
            discount.code
        );
        Ok(discount)
    }
}

fn required_code(code: &str) -> DiscountResult<String> {
    let code = normalize_code(code);
    if code.is_empty() {
        return Err(DiscountError::InvalidData(
            "Discount must have a code".to_string(),
        ));
    }
    Ok(code)
}

fn ensure_window(starts_at: DateTime<Utc>, ends_at: Option<DateTime<Utc>>) -> DiscountResult<()> {
    match ends_at {
        Some(ends_at) if ends_at <= starts_at => Err(DiscountError::InvalidData(
            "\"ends_at\" must be greater than \"starts_at\"".to_string(),
        )),
        _ => Ok(()),
    }
}

fn distinct(ids: &[Uuid]) -> Vec<Uuid> {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }
    seen
}

fn merge_metadata(target: &mut Metadata, update: Metadata) {
    for (key, value) in update {
        if value.is_null() {
            target.remove(&key);
        } else {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert("campaign".to_string(), json!("spring"));
        metadata.insert("channel".to_string(), json!("email"));

        let mut update = Metadata::new();
        update.insert("channel".to_string(), serde_json::Value::Null);
        update.insert("owner".to_string(), json!("marketing"));
        merge_metadata(&mut metadata, update);

        assert_eq!(metadata.get("campaign"), Some(&json!("spring")));
        assert_eq!(metadata.get("owner"), Some(&json!("marketing")));
        assert!(!metadata.contains_key("channel"));
    }

    #[test]
    fn test_ensure_window() {
        let start = Utc::now();
        assert!(ensure_window(start, None).is_ok());
        assert!(ensure_window(start, Some(start + chrono::Duration::hours(1))).is_ok());
        assert!(ensure_window(start, Some(start)).is_err());
    }

    #[test]
    fn test_required_code() {
        assert_eq!(required_code("spring10").unwrap(), "SPRING10");
        assert!(matches!(required_code(""), Err(DiscountError::InvalidData(_))));
        assert_eq!(required_code(" x ").unwrap(), " X ");
    }

    #[test]
    fn test_distinct_keeps_first_occurrence() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(distinct(&[a, b, a]), vec![a, b]);
    }
}
