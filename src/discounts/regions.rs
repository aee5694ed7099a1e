// Region Assignment
//
// Adds and removes regions on a discount while keeping a fixed-amount
// discount bound to at most one region.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::discounts::collaborators::RegionLookup;
use crate::discounts::models::Discount;
use crate::discounts::repository::DiscountRepository;
use crate::discounts::rule_validator::ensure_region_cardinality;
use crate::error::DiscountResult;

/// Resolve region ids through the region lookup, dropping repeats
///
/// Fails with NotFound on the first unknown region.
pub async fn resolve_regions(lookup: &dyn RegionLookup, region_ids: &[Uuid]) -> DiscountResult<Vec<Uuid>> {
    let mut resolved: Vec<Uuid> = Vec::with_capacity(region_ids.len());
    for region_id in region_ids {
        if resolved.contains(region_id) {
            continue;
        }
        let region = lookup.retrieve(*region_id).await?;
        resolved.push(region.id);
    }
    Ok(resolved)
}

/// Attach a region; already attached regions leave the discount unchanged
pub async fn add_region<R: DiscountRepository>(
    repo: &R,
    tx: &mut R::Tx,
    lookup: &dyn RegionLookup,
    discount_id: Uuid,
    region_id: Uuid,
    now: DateTime<Utc>,
) -> DiscountResult<Discount> {
    let mut discount = repo.get(tx, discount_id).await?;

    if discount.has_region(region_id) {
        return Ok(discount);
    }

    ensure_region_cardinality(discount.rule.rule_type, discount.regions.len() + 1)?;

    let region = lookup.retrieve(region_id).await?;
    discount.regions.push(region.id);
    discount.updated_at = now;
    repo.save(tx, &discount).await?;

    tracing::info!("Added region {} to discount {}", region.name, discount.code);
    Ok(discount)
}

/// Detach a region; regions not attached leave the discount unchanged
pub async fn remove_region<R: DiscountRepository>(
    repo: &R,
    tx: &mut R::Tx,
    discount_id: Uuid,
    region_id: Uuid,
    now: DateTime<Utc>,
) -> DiscountResult<Discount> {
    let mut discount = repo.get(tx, discount_id).await?;

    if !discount.has_region(region_id) {
        return Ok(discount);
    }

    discount.regions.retain(|id| *id != region_id);
    discount.updated_at = now;
    repo.save(tx, &discount).await?;

    tracing::info!("Removed region {} from discount {}", region_id, discount.code);
    Ok(discount)
}
