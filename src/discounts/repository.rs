use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use crate::discounts::models::{
    AllocationType, Discount, DiscountCondition, DiscountFilter, DiscountRule, DiscountRuleType,
    Metadata, Pagination,
};
use crate::error::{DiscountError, DiscountResult};

/// Name reported with unique violations on the discount code
pub const CODE_UNIQUE_CONSTRAINT: &str = "discounts_code_active_key";

/// Storage seam for discounts
///
/// Every call takes the transaction it runs in. A transaction from `begin` is
/// a writer; one from `begin_read` only sees the last committed state and
/// rejects writes. Dropping a transaction without `commit` discards it.
///
/// Finders never return soft-deleted records.
#[async_trait]
pub trait DiscountRepository: Send + Sync {
    type Tx: Send;

    async fn begin(&self) -> DiscountResult<Self::Tx>;

    async fn begin_read(&self) -> DiscountResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> DiscountResult<()>;

    async fn find_by_id(&self, tx: &mut Self::Tx, id: Uuid) -> DiscountResult<Option<Discount>>;

    /// Like `find_by_id` but fails with NotFound
    async fn get(&self, tx: &mut Self::Tx, id: Uuid) -> DiscountResult<Discount> {
        self.find_by_id(tx, id)
            .await?
            .ok_or_else(|| DiscountError::NotFound(format!("Discount with id {} was not found", id)))
    }

    /// Find by stored (upper-cased) code among static or dynamic discounts
    async fn find_by_code(
        &self,
        tx: &mut Self::Tx,
        code: &str,
        is_dynamic: bool,
    ) -> DiscountResult<Option<Discount>>;

    /// Find a dynamic child of `parent_id` by stored code
    async fn find_child(
        &self,
        tx: &mut Self::Tx,
        parent_id: Uuid,
        code: &str,
    ) -> DiscountResult<Option<Discount>>;

    /// Insert a new discount and its rule; fails with UniqueViolation on a taken code
    async fn insert(&self, tx: &mut Self::Tx, discount: &Discount) -> DiscountResult<()>;

    /// Overwrite an existing discount, its rule and its region set
    async fn save(&self, tx: &mut Self::Tx, discount: &Discount) -> DiscountResult<()>;

    async fn soft_delete(&self, tx: &mut Self::Tx, id: Uuid, at: DateTime<Utc>) -> DiscountResult<()>;

    /// Page of matching discounts, newest first, plus the total match count
    async fn list(
        &self,
        tx: &mut Self::Tx,
        filter: &DiscountFilter,
        page: Pagination,
    ) -> DiscountResult<(Vec<Discount>, u64)>;

    /// Increment `usage_count` unless `usage_limit` is reached
    ///
    /// Returns false when the limit blocked the increment or the discount is gone.
    /// Fails instead of wrapping when the count is at `i32::MAX`.
    async fn increment_usage(&self, tx: &mut Self::Tx, id: Uuid) -> DiscountResult<bool>;
}

fn read_only_write() -> DiscountError {
    DiscountError::NotAllowed("Cannot write inside a read-only transaction".to_string())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct StoreState {
    discounts: HashMap<Uuid, Discount>,
    /// Rules are shared between a dynamic template and its children
    rules: HashMap<Uuid, DiscountRule>,
}

impl StoreState {
    fn hydrate(&self, discount: &Discount) -> Discount {
        let mut discount = discount.clone();
        if let Some(rule) = self.rules.get(&discount.rule.id) {
            discount.rule = rule.clone();
        }
        discount
    }

    fn active(&self) -> impl Iterator<Item = &Discount> {
        self.discounts.values().filter(|d| !d.is_deleted())
    }

    fn code_taken(&self, code: &str, except: Uuid) -> bool {
        self.active().any(|d| d.id != except && d.code == code)
    }
}

/// Transaction over the in-memory store
pub struct MemoryTx {
    state: Arc<StoreState>,
    /// Held for the lifetime of a write transaction
    writer: Option<OwnedMutexGuard<()>>,
}

impl MemoryTx {
    fn state_mut(&mut self) -> DiscountResult<&mut StoreState> {
        if self.writer.is_none() {
            return Err(read_only_write());
        }
        Ok(Arc::make_mut(&mut self.state))
    }
}

/// Keyed in-memory store
///
/// One writer at a time. A write transaction works on a private copy of the
/// committed state that is published on commit; readers keep the snapshot
/// they started with.
#[derive(Clone, Default)]
pub struct MemoryDiscountRepository {
    committed: Arc<RwLock<Arc<StoreState>>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryDiscountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DiscountRepository for MemoryDiscountRepository {
    type Tx = MemoryTx;

    async fn begin(&self) -> DiscountResult<MemoryTx> {
        let guard = self.writer.clone().lock_owned().await;
        let state = self.committed.read().await.clone();
        Ok(MemoryTx {
            state,
            writer: Some(guard),
        })
    }

    async fn begin_read(&self) -> DiscountResult<MemoryTx> {
        let state = self.committed.read().await.clone();
        Ok(MemoryTx { state, writer: None })
    }

    async fn commit(&self, tx: MemoryTx) -> DiscountResult<()> {
        if tx.writer.is_some() {
            *self.committed.write().await = tx.state;
        }
        Ok(())
    }

    async fn find_by_id(&self, tx: &mut MemoryTx, id: Uuid) -> DiscountResult<Option<Discount>> {
        Ok(tx
            .state
            .discounts
            .get(&id)
            .filter(|d| !d.is_deleted())
            .map(|d| tx.state.hydrate(d)))
    }

    async fn find_by_code(
        &self,
        tx: &mut MemoryTx,
        code: &str,
        is_dynamic: bool,
    ) -> DiscountResult<Option<Discount>> {
        Ok(tx
            .state
            .active()
            .find(|d| d.code == code && d.is_dynamic == is_dynamic)
            .map(|d| tx.state.hydrate(d)))
    }

    async fn find_child(
        &self,
        tx: &mut MemoryTx,
        parent_id: Uuid,
        code: &str,
    ) -> DiscountResult<Option<Discount>> {
        Ok(tx
            .state
            .active()
            .find(|d| d.parent_discount_id == Some(parent_id) && d.code == code)
            .map(|d| tx.state.hydrate(d)))
    }

    async fn insert(&self, tx: &mut MemoryTx, discount: &Discount) -> DiscountResult<()> {
        let state = tx.state_mut()?;
        if state.code_taken(&discount.code, discount.id) || state.discounts.contains_key(&discount.id) {
            return Err(DiscountError::UniqueViolation(CODE_UNIQUE_CONSTRAINT.to_string()));
        }
        state.rules.insert(discount.rule.id, discount.rule.clone());
        state.discounts.insert(discount.id, discount.clone());
        Ok(())
    }

    async fn save(&self, tx: &mut MemoryTx, discount: &Discount) -> DiscountResult<()> {
        let state = tx.state_mut()?;
        if !state.discounts.contains_key(&discount.id) {
            return Err(DiscountError::NotFound(format!(
                "Discount with id {} was not found",
                discount.id
            )));
        }
        if state.code_taken(&discount.code, discount.id) {
            return Err(DiscountError::UniqueViolation(CODE_UNIQUE_CONSTRAINT.to_string()));
        }
        state.rules.insert(discount.rule.id, discount.rule.clone());
        state.discounts.insert(discount.id, discount.clone());
        Ok(())
    }

    async fn soft_delete(&self, tx: &mut MemoryTx, id: Uuid, at: DateTime<Utc>) -> DiscountResult<()> {
        let state = tx.state_mut()?;
        if let Some(discount) = state.discounts.get_mut(&id) {
            if discount.deleted_at.is_none() {
                discount.deleted_at = Some(at);
                discount.updated_at = at;
            }
        }
        Ok(())
    }

    async fn list(
        &self,
        tx: &mut MemoryTx,
        filter: &DiscountFilter,
        page: Pagination,
    ) -> DiscountResult<(Vec<Discount>, u64)> {
        let mut matching: Vec<&Discount> =
            tx.state.discounts.values().filter(|d| filter.matches(d)).collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        let count = matching.len() as u64;
        let discounts = matching
            .into_iter()
            .skip(page.skip as usize)
            .take(page.take as usize)
            .map(|d| tx.state.hydrate(d))
            .collect();

        Ok((discounts, count))
    }

    async fn increment_usage(&self, tx: &mut MemoryTx, id: Uuid) -> DiscountResult<bool> {
        let state = tx.state_mut()?;
        let Some(discount) = state.discounts.get_mut(&id).filter(|d| !d.is_deleted()) else {
            return Ok(false);
        };

        if let Some(limit) = discount.usage_limit {
            if discount.usage_count >= limit {
                return Ok(false);
            }
        }

        discount.usage_count = discount.usage_count.checked_add(1).ok_or_else(|| {
            DiscountError::NotAllowed(format!("Usage count of discount {} is at its maximum", id))
        })?;
        discount.updated_at = Utc::now();
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// PostgreSQL store
// ---------------------------------------------------------------------------

const SELECT_DISCOUNTS_SQL: &str = r#"
    SELECT d.id, d.code, d.is_dynamic, d.is_disabled, d.starts_at, d.ends_at,
           d.usage_limit, d.usage_count, d.valid_duration, d.parent_discount_id,
           d.metadata, d.created_at, d.updated_at, d.deleted_at,
           r.id AS rule_id, r.type AS rule_type, r.value AS rule_value,
           r.allocation AS rule_allocation, r.description AS rule_description,
           r.conditions AS rule_conditions,
           ARRAY(
               SELECT dr.region_id FROM discount_regions dr
               WHERE dr.discount_id = d.id
               ORDER BY dr.position
           ) AS regions
    FROM discounts d
    JOIN discount_rules r ON r.id = d.rule_id
"#;

#[derive(Debug, sqlx::FromRow)]
struct DiscountRow {
    id: Uuid,
    code: String,
    is_dynamic: bool,
    is_disabled: bool,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    usage_limit: Option<i32>,
    usage_count: i32,
    valid_duration: Option<String>,
    parent_discount_id: Option<Uuid>,
    metadata: Json<Metadata>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
    rule_id: Uuid,
    rule_type: DiscountRuleType,
    rule_value: Decimal,
    rule_allocation: Option<AllocationType>,
    rule_description: Option<String>,
    rule_conditions: Json<Vec<DiscountCondition>>,
    regions: Vec<Uuid>,
}

impl From<DiscountRow> for Discount {
    fn from(row: DiscountRow) -> Self {
        Discount {
            id: row.id,
            code: row.code,
            is_dynamic: row.is_dynamic,
            is_disabled: row.is_disabled,
            starts_at: row.starts_at,
            ends_at: row.ends_at,
            usage_limit: row.usage_limit,
            usage_count: row.usage_count,
            valid_duration: row.valid_duration,
            parent_discount_id: row.parent_discount_id,
            regions: row.regions,
            rule: DiscountRule {
                id: row.rule_id,
                rule_type: row.rule_type,
                value: row.rule_value,
                allocation: row.rule_allocation,
                description: row.rule_description,
                conditions: row.rule_conditions.0,
            },
            metadata: row.metadata.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgDiscountRepository {
    pool: PgPool,
}

impl PgDiscountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn select_active() -> QueryBuilder<'static, Postgres> {
        let mut builder = QueryBuilder::<Postgres>::new(SELECT_DISCOUNTS_SQL);
        builder.push(" WHERE d.deleted_at IS NULL");
        builder
    }

    async fn fetch_first(
        tx: &mut Transaction<'static, Postgres>,
        mut builder: QueryBuilder<'static, Postgres>,
    ) -> DiscountResult<Option<Discount>> {
        builder.push(" LIMIT 1");

        let row = builder
            .build_query_as::<DiscountRow>()
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(Discount::from))
    }

    async fn upsert_rule(tx: &mut Transaction<'static, Postgres>, rule: &DiscountRule) -> DiscountResult<()> {
        sqlx::query(
            r#"
            INSERT INTO discount_rules (id, type, value, allocation, description, conditions)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO UPDATE
            SET type = EXCLUDED.type,
                value = EXCLUDED.value,
                allocation = EXCLUDED.allocation,
                description = EXCLUDED.description,
                conditions = EXCLUDED.conditions,
                updated_at = NOW()
            "#,
        )
        .bind(rule.id)
        .bind(rule.rule_type)
        .bind(rule.value)
        .bind(rule.allocation)
        .bind(&rule.description)
        .bind(Json(&rule.conditions))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn replace_regions(
        tx: &mut Transaction<'static, Postgres>,
        discount_id: Uuid,
        regions: &[Uuid],
    ) -> DiscountResult<()> {
        sqlx::query("DELETE FROM discount_regions WHERE discount_id = $1")
            .bind(discount_id)
            .execute(&mut **tx)
            .await?;

        for (position, region_id) in regions.iter().enumerate() {
            sqlx::query(
                "INSERT INTO discount_regions (discount_id, region_id, position) VALUES ($1, $2, $3)",
            )
            .bind(discount_id)
            .bind(region_id)
            .bind(position as i32)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }
}

fn push_filters(builder: &mut QueryBuilder<'static, Postgres>, filter: &DiscountFilter) {
    builder.push(" WHERE d.deleted_at IS NULL");

    if let Some(ref q) = filter.q {
        builder.push(" AND d.code ILIKE ");
        builder.push_bind(format!("%{}%", q));
    }
    if let Some(ref code) = filter.code {
        builder.push(" AND d.code = ");
        builder.push_bind(crate::discounts::models::normalize_code(code));
    }
    if let Some(is_dynamic) = filter.is_dynamic {
        builder.push(" AND d.is_dynamic = ");
        builder.push_bind(is_dynamic);
    }
    if let Some(is_disabled) = filter.is_disabled {
        builder.push(" AND d.is_disabled = ");
        builder.push_bind(is_disabled);
    }
    if let Some(parent_id) = filter.parent_discount_id {
        builder.push(" AND d.parent_discount_id = ");
        builder.push_bind(parent_id);
    }
}

#[async_trait]
impl DiscountRepository for PgDiscountRepository {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> DiscountResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn begin_read(&self) -> DiscountResult<Self::Tx> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> DiscountResult<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, tx: &mut Self::Tx, id: Uuid) -> DiscountResult<Option<Discount>> {
        let mut builder = Self::select_active();
        builder.push(" AND d.id = ").push_bind(id);
        Self::fetch_first(tx, builder).await
    }

    async fn find_by_code(
        &self,
        tx: &mut Self::Tx,
        code: &str,
        is_dynamic: bool,
    ) -> DiscountResult<Option<Discount>> {
        let mut builder = Self::select_active();
        builder.push(" AND d.code = ").push_bind(code.to_string());
        builder.push(" AND d.is_dynamic = ").push_bind(is_dynamic);
        Self::fetch_first(tx, builder).await
    }

    async fn find_child(
        &self,
        tx: &mut Self::Tx,
        parent_id: Uuid,
        code: &str,
    ) -> DiscountResult<Option<Discount>> {
        let mut builder = Self::select_active();
        builder.push(" AND d.parent_discount_id = ").push_bind(parent_id);
        builder.push(" AND d.code = ").push_bind(code.to_string());
        Self::fetch_first(tx, builder).await
    }

    async fn insert(&self, tx: &mut Self::Tx, discount: &Discount) -> DiscountResult<()> {
        Self::upsert_rule(tx, &discount.rule).await?;

        sqlx::query(
            r#"
            INSERT INTO discounts (
                id, code, is_dynamic, is_disabled, rule_id, starts_at, ends_at,
                usage_limit, usage_count, valid_duration, parent_discount_id,
                metadata, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(discount.id)
        .bind(&discount.code)
        .bind(discount.is_dynamic)
        .bind(discount.is_disabled)
        .bind(discount.rule.id)
        .bind(discount.starts_at)
        .bind(discount.ends_at)
        .bind(discount.usage_limit)
        .bind(discount.usage_count)
        .bind(&discount.valid_duration)
        .bind(discount.parent_discount_id)
        .bind(Json(&discount.metadata))
        .bind(discount.created_at)
        .bind(discount.updated_at)
        .execute(&mut **tx)
        .await?;

        Self::replace_regions(tx, discount.id, &discount.regions).await
    }

    async fn save(&self, tx: &mut Self::Tx, discount: &Discount) -> DiscountResult<()> {
        Self::upsert_rule(tx, &discount.rule).await?;

        let result = sqlx::query(
            r#"
            UPDATE discounts
            SET code = $2, is_dynamic = $3, is_disabled = $4, rule_id = $5,
                starts_at = $6, ends_at = $7, usage_limit = $8, valid_duration = $9,
                metadata = $10, updated_at = $11
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(discount.id)
        .bind(&discount.code)
        .bind(discount.is_dynamic)
        .bind(discount.is_disabled)
        .bind(discount.rule.id)
        .bind(discount.starts_at)
        .bind(discount.ends_at)
        .bind(discount.usage_limit)
        .bind(&discount.valid_duration)
        .bind(Json(&discount.metadata))
        .bind(discount.updated_at)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DiscountError::NotFound(format!(
                "Discount with id {} was not found",
                discount.id
            )));
        }

        Self::replace_regions(tx, discount.id, &discount.regions).await
    }

    async fn soft_delete(&self, tx: &mut Self::Tx, id: Uuid, at: DateTime<Utc>) -> DiscountResult<()> {
        sqlx::query(
            "UPDATE discounts SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn list(
        &self,
        tx: &mut Self::Tx,
        filter: &DiscountFilter,
        page: Pagination,
    ) -> DiscountResult<(Vec<Discount>, u64)> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM discounts d");
        push_filters(&mut count_query, filter);
        let count: i64 = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut **tx)
            .await?;

        let mut query = QueryBuilder::<Postgres>::new(SELECT_DISCOUNTS_SQL);
        push_filters(&mut query, filter);
        query.push(" ORDER BY d.created_at DESC, d.id");
        query.push(" OFFSET ");
        query.push_bind(i64::from(page.skip));
        query.push(" LIMIT ");
        query.push_bind(i64::from(page.take));

        let rows = query
            .build_query_as::<DiscountRow>()
            .fetch_all(&mut **tx)
            .await?;

        Ok((rows.into_iter().map(Discount::from).collect(), count.max(0) as u64))
    }

    async fn increment_usage(&self, tx: &mut Self::Tx, id: Uuid) -> DiscountResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE discounts
            SET usage_count = usage_count + 1, updated_at = NOW()
            WHERE id = $1
              AND deleted_at IS NULL
              AND (usage_limit IS NULL OR usage_count < usage_limit)
            "#,
        )
        .bind(id)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discounts::models::normalize_code;
    use rust_decimal_macros::dec;

    fn discount(code: &str) -> Discount {
        let now = Utc::now();
        Discount {
            id: Uuid::new_v4(),
            code: normalize_code(code),
            is_dynamic: false,
            is_disabled: false,
            starts_at: now,
            ends_at: None,
            usage_limit: None,
            usage_count: 0,
            valid_duration: None,
            parent_discount_id: None,
            regions: vec![Uuid::new_v4()],
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

    async fn seed(repo: &MemoryDiscountRepository, discount: &Discount) {
        let mut tx = repo.begin().await.unwrap();
        repo.insert(&mut tx, discount).await.unwrap();
        repo.commit(tx).await.unwrap();
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_discarded() {
        let repo = MemoryDiscountRepository::new();
        let record = discount("DROPPED");

        {
            let mut tx = repo.begin().await.unwrap();
            repo.insert(&mut tx, &record).await.unwrap();
            assert!(repo.find_by_id(&mut tx, record.id).await.unwrap().is_some());
        }

        let mut tx = repo.begin_read().await.unwrap();
        assert!(repo.find_by_id(&mut tx, record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_readers_keep_their_snapshot() {
        let repo = MemoryDiscountRepository::new();
        let record = discount("SNAPSHOT");

        let mut reader = repo.begin_read().await.unwrap();
        seed(&repo, &record).await;

        assert!(repo.find_by_id(&mut reader, record.id).await.unwrap().is_none());
        let mut fresh = repo.begin_read().await.unwrap();
        assert!(repo.find_by_id(&mut fresh, record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_transaction_rejects_writes() {
        let repo = MemoryDiscountRepository::new();
        let mut tx = repo.begin_read().await.unwrap();
        let err = repo.insert(&mut tx, &discount("NOPE")).await.unwrap_err();
        assert!(matches!(err, DiscountError::NotAllowed(_)));
    }

    #[tokio::test]
    async fn test_duplicate_code_is_unique_violation() {
        let repo = MemoryDiscountRepository::new();
        seed(&repo, &discount("TAKEN")).await;

        let mut tx = repo.begin().await.unwrap();
        let err = repo.insert(&mut tx, &discount("TAKEN")).await.unwrap_err();
        assert!(matches!(err, DiscountError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn test_deleted_code_can_be_reused() {
        let repo = MemoryDiscountRepository::new();
        let first = discount("REUSE");
        seed(&repo, &first).await;

        let mut tx = repo.begin().await.unwrap();
        repo.soft_delete(&mut tx, first.id, Utc::now()).await.unwrap();
        repo.insert(&mut tx, &discount("REUSE")).await.unwrap();
        repo.commit(tx).await.unwrap();

        let mut tx = repo.begin_read().await.unwrap();
        assert!(repo.find_by_id(&mut tx, first.id).await.unwrap().is_none());
        let found = repo.find_by_code(&mut tx, "REUSE", false).await.unwrap().unwrap();
        assert_ne!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_children_share_the_template_rule() {
        let repo = MemoryDiscountRepository::new();
        let parent = discount("TEMPLATE");
        let mut child = discount("CHILD1");
        child.rule = parent.rule.clone();
        child.parent_discount_id = Some(parent.id);
        child.is_dynamic = true;
        seed(&repo, &parent).await;
        seed(&repo, &child).await;

        let mut updated = parent.clone();
        updated.rule.value = dec!(25);
        let mut tx = repo.begin().await.unwrap();
        repo.save(&mut tx, &updated).await.unwrap();
        repo.commit(tx).await.unwrap();

        let mut tx = repo.begin_read().await.unwrap();
        let child = repo.find_child(&mut tx, parent.id, "CHILD1").await.unwrap().unwrap();
        assert_eq!(child.rule.value, dec!(25));
    }

    #[tokio::test]
    async fn test_increment_usage_stops_at_limit() {
        let repo = MemoryDiscountRepository::new();
        let mut record = discount("LIMITED");
        record.usage_limit = Some(2);
        seed(&repo, &record).await;

        let mut tx = repo.begin().await.unwrap();
        assert!(repo.increment_usage(&mut tx, record.id).await.unwrap());
        assert!(repo.increment_usage(&mut tx, record.id).await.unwrap());
        assert!(!repo.increment_usage(&mut tx, record.id).await.unwrap());
        repo.commit(tx).await.unwrap();

        let mut tx = repo.begin_read().await.unwrap();
        let stored = repo.find_by_id(&mut tx, record.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, 2);
    }

    #[tokio::test]
    async fn test_increment_usage_at_max_count_fails() {
        let repo = MemoryDiscountRepository::new();
        let mut record = discount("UNLIMITED");
        record.usage_count = i32::MAX;
        seed(&repo, &record).await;

        let mut tx = repo.begin().await.unwrap();
        let err = repo.increment_usage(&mut tx, record.id).await.unwrap_err();
        assert!(matches!(err, DiscountError::NotAllowed(_)));

        let stored = repo.find_by_id(&mut tx, record.id).await.unwrap().unwrap();
        assert_eq!(stored.usage_count, i32::MAX);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first_and_counts() {
        let repo = MemoryDiscountRepository::new();
        let base = Utc::now();
        for (offset, code) in ["OLDEST", "MIDDLE", "NEWEST"].iter().enumerate() {
            let mut record = discount(code);
            record.created_at = base + chrono::Duration::seconds(offset as i64);
            seed(&repo, &record).await;
        }

        let mut tx = repo.begin_read().await.unwrap();
        let (page, count) = repo
            .list(&mut tx, &DiscountFilter::default(), Pagination::new(0, 2))
            .await
            .unwrap();

        assert_eq!(count, 3);
        let codes: Vec<&str> = page.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(codes, vec!["NEWEST", "MIDDLE"]);
    }
}

/// Tests against a live PostgreSQL database
///
/// Run with `TEST_DATABASE_URL` set and `cargo test -- --ignored`.
#[cfg(test)]
mod pg_tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn repository() -> PgDiscountRepository {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        let pool = PgPool::connect(&url).await.expect("connect to test database");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("run migrations");
        PgDiscountRepository::new(pool)
    }

    fn discount(code: &str, usage_limit: Option<i32>) -> Discount {
        let now = Utc::now();
        Discount {
            id: Uuid::new_v4(),
            code: code.to_string(),
            is_dynamic: false,
            is_disabled: false,
            starts_at: now,
            ends_at: None,
            usage_limit,
            usage_count: 0,
            valid_duration: None,
            parent_discount_id: None,
            regions: vec![Uuid::new_v4()],
            rule: DiscountRule {
                id: Uuid::new_v4(),
                rule_type: DiscountRuleType::Fixed,
                value: dec!(500),
                allocation: Some(AllocationType::Total),
                description: Some("500 off".to_string()),
                conditions: vec![],
            },
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_insert_and_find() {
        let repo = repository().await;
        let code = format!("PG{}", Uuid::new_v4().simple()).to_uppercase();
        let record = discount(&code, None);

        let mut tx = repo.begin().await.unwrap();
        repo.insert(&mut tx, &record).await.unwrap();
        repo.commit(tx).await.unwrap();

        let mut tx = repo.begin_read().await.unwrap();
        let found = repo.find_by_code(&mut tx, &code, false).await.unwrap().unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(found.regions, record.regions);
        assert_eq!(found.rule.allocation, Some(AllocationType::Total));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_duplicate_code() {
        let repo = repository().await;
        let code = format!("DUP{}", Uuid::new_v4().simple()).to_uppercase();

        let mut tx = repo.begin().await.unwrap();
        repo.insert(&mut tx, &discount(&code, None)).await.unwrap();
        let err = repo.insert(&mut tx, &discount(&code, None)).await.unwrap_err();
        assert!(matches!(err, DiscountError::UniqueViolation(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_increment_usage_respects_limit() {
        let repo = repository().await;
        let code = format!("USE{}", Uuid::new_v4().simple()).to_uppercase();
        let record = discount(&code, Some(1));

        let mut tx = repo.begin().await.unwrap();
        repo.insert(&mut tx, &record).await.unwrap();
        assert!(repo.increment_usage(&mut tx, record.id).await.unwrap());
        assert!(!repo.increment_usage(&mut tx, record.id).await.unwrap());
        repo.commit(tx).await.unwrap();
    }
}
