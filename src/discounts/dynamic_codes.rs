// Dynamic Code Manager
//
// A dynamic discount is a template. Child codes share its rule and usage
// limit and are deleted one by one; removing the template leaves them alone.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::discounts::duration::expiry_from;
use crate::discounts::models::{normalize_code, CreateDynamicDiscountInput, Discount};
use crate::discounts::repository::DiscountRepository;
use crate::error::{DiscountError, DiscountResult};

/// Spawn a child code from the dynamic template `parent_id`
pub async fn create_dynamic_code<R: DiscountRepository>(
    repo: &R,
    tx: &mut R::Tx,
    parent_id: Uuid,
    input: CreateDynamicDiscountInput,
    now: DateTime<Utc>,
) -> DiscountResult<Discount> {
    let parent = repo.get(tx, parent_id).await?;

    if !parent.is_dynamic {
        tracing::warn!("Refusing to spawn a code from non-dynamic discount {}", parent.code);
        return Err(DiscountError::NotAllowed(
            "Discount must be set to dynamic".to_string(),
        ));
    }

    let code = normalize_code(&input.code);
    if code.is_empty() {
        return Err(DiscountError::InvalidData(
            "Discount must have a code".to_string(),
        ));
    }

    let ends_at = match parent.valid_duration.as_deref() {
        Some(valid_duration) => Some(expiry_from(now, valid_duration)?),
        None => input.ends_at,
    };

    let child = Discount {
        id: Uuid::new_v4(),
        code,
        is_dynamic: true,
        is_disabled: false,
        starts_at: now,
        ends_at,
        usage_limit: parent.usage_limit,
        usage_count: 0,
        valid_duration: None,
        parent_discount_id: Some(parent.id),
        regions: Vec::new(),
        rule: parent.rule.clone(),
        metadata: input.metadata.unwrap_or_default(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };

    repo.insert(tx, &child)
        .await
        .map_err(|e| e.into_duplicate(&child.code))?;

    tracing::info!("Created dynamic code {} from template {}", child.code, parent.code);
    Ok(child)
}

/// Soft-delete the child `code` of template `parent_id`; absent children are a no-op
pub async fn delete_dynamic_code<R: DiscountRepository>(
    repo: &R,
    tx: &mut R::Tx,
    parent_id: Uuid,
    code: &str,
    now: DateTime<Utc>,
) -> DiscountResult<()> {
    let code = normalize_code(code);

    match repo.find_child(tx, parent_id, &code).await? {
        Some(child) => {
            repo.soft_delete(tx, child.id, now).await?;
            tracing::info!("Deleted dynamic code {} of template {}", code, parent_id);
        }
        None => {
            tracing::debug!("Dynamic code {} of template {} not found, nothing to delete", code, parent_id);
        }
    }

    Ok(())
}
