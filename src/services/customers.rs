use crate::{
    db::DbPool,
    entities::customer::{
        self, phone_identity_key, stable_identity_key, Entity as CustomerEntity,
        Model as CustomerModel,
    },
    errors::ServiceError,
    models::Platform,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Strips the separators people type into phone numbers.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')' | '.'))
        .collect()
}

/// Who placed an order, as far as the storefront can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerIdentity {
    pub platform: Platform,
    pub platform_user_id: Option<String>,
    pub name: String,
    pub phone: String,
}

impl CustomerIdentity {
    /// Builds an identity, trimming the name and normalizing the phone.
    /// A blank platform user id counts as absent.
    pub fn new(
        platform: Platform,
        platform_user_id: Option<String>,
        name: &str,
        phone: &str,
    ) -> Self {
        Self {
            platform,
            platform_user_id: platform_user_id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            name: name.trim().to_string(),
            phone: normalize_phone(phone),
        }
    }
}

/// How a customer record was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    /// Matched on `(platform, platform_user_id)`
    StableId,
    /// A phone-keyed record was claimed by a stable id for the first time
    AdoptedPhone,
    /// Matched on `(platform, phone)`
    Phone,
    /// No record existed; a new one was inserted
    Created,
}

#[derive(Debug, Clone)]
pub struct ResolvedCustomer {
    pub customer: CustomerModel,
    pub via: ResolvedVia,
}

impl ResolvedCustomer {
    pub fn was_created(&self) -> bool {
        self.via == ResolvedVia::Created
    }
}

/// Maps an incoming identity onto exactly one customer row.
///
/// Every path writes first and reads back afterwards, so two concurrent resolutions of
/// the same identity serialize on the `(platform, identity_key)` unique index instead
/// of racing a read against an insert.
#[derive(Clone)]
pub struct IdentityResolver {
    db_pool: Arc<DbPool>,
}

impl IdentityResolver {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Resolves an identity in its own transaction.
    #[instrument(skip(self, identity), fields(platform = %identity.platform))]
    pub async fn resolve(
        &self,
        identity: &CustomerIdentity,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for identity resolution");
            ServiceError::from(e)
        })?;
        let resolved = self.resolve_in(&txn, identity).await?;
        txn.commit().await?;
        Ok(resolved)
    }

    /// Resolves an identity inside the caller's transaction.
    pub async fn resolve_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        identity: &CustomerIdentity,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let now = Utc::now();
        let resolved = match identity.platform_user_id.as_deref() {
            Some(user_id) => self.resolve_stable(conn, identity, user_id, now).await?,
            None => self.resolve_by_phone(conn, identity, now).await?,
        };
        debug!(
            customer_id = %resolved.customer.id,
            via = ?resolved.via,
            "Customer identity resolved"
        );
        Ok(resolved)
    }

    async fn resolve_stable<C: ConnectionTrait>(
        &self,
        conn: &C,
        identity: &CustomerIdentity,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let stable_key = stable_identity_key(user_id);

        let touched = CustomerEntity::update_many()
            .col_expr(customer::Column::Name, Expr::value(identity.name.clone()))
            .col_expr(customer::Column::Phone, Expr::value(identity.phone.clone()))
            .col_expr(customer::Column::UpdatedAt, Expr::value(now))
            .filter(customer::Column::Platform.eq(identity.platform))
            .filter(customer::Column::PlatformUserId.eq(user_id))
            .exec(conn)
            .await?
            .rows_affected;
        if touched > 0 {
            return self
                .fetch(conn, identity.platform, &stable_key, ResolvedVia::StableId)
                .await;
        }

        // First order with this id: claim the record created earlier from the phone alone.
        let adopted = CustomerEntity::update_many()
            .col_expr(
                customer::Column::PlatformUserId,
                Expr::value(Some(user_id.to_string())),
            )
            .col_expr(customer::Column::IdentityKey, Expr::value(stable_key.clone()))
            .col_expr(customer::Column::Name, Expr::value(identity.name.clone()))
            .col_expr(customer::Column::UpdatedAt, Expr::value(now))
            .filter(customer::Column::Platform.eq(identity.platform))
            .filter(customer::Column::IdentityKey.eq(phone_identity_key(&identity.phone)))
            .exec(conn)
            .await?
            .rows_affected;
        if adopted > 0 {
            return self
                .fetch(conn, identity.platform, &stable_key, ResolvedVia::AdoptedPhone)
                .await;
        }

        self.upsert(conn, identity, stable_key, now).await
    }

    async fn resolve_by_phone<C: ConnectionTrait>(
        &self,
        conn: &C,
        identity: &CustomerIdentity,
        now: DateTime<Utc>,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let phone_key = phone_identity_key(&identity.phone);

        let touched = CustomerEntity::update_many()
            .col_expr(customer::Column::Name, Expr::value(identity.name.clone()))
            .col_expr(customer::Column::UpdatedAt, Expr::value(now))
            .filter(customer::Column::Platform.eq(identity.platform))
            .filter(customer::Column::IdentityKey.eq(phone_key.as_str()))
            .exec(conn)
            .await?
            .rows_affected;
        if touched > 0 {
            return self
                .fetch(conn, identity.platform, &phone_key, ResolvedVia::Phone)
                .await;
        }

        // A customer known by stable id who now orders without it, e.g. from a guest session.
        let known = CustomerEntity::find()
            .filter(customer::Column::Platform.eq(identity.platform))
            .filter(customer::Column::Phone.eq(identity.phone.as_str()))
            .order_by_desc(customer::Column::UpdatedAt)
            .order_by_asc(customer::Column::Id)
            .one(conn)
            .await?;
        if let Some(existing) = known {
            let mut active: customer::ActiveModel = existing.into();
            active.name = Set(identity.name.clone());
            active.updated_at = Set(now);
            let customer = active.update(conn).await?;
            return Ok(ResolvedCustomer {
                customer,
                via: ResolvedVia::Phone,
            });
        }

        self.upsert(conn, identity, phone_key, now).await
    }

    async fn upsert<C: ConnectionTrait>(
        &self,
        conn: &C,
        identity: &CustomerIdentity,
        identity_key: String,
        now: DateTime<Utc>,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let candidate_id = Uuid::new_v4();
        let row = customer::ActiveModel {
            id: Set(candidate_id),
            platform: Set(identity.platform),
            platform_user_id: Set(identity.platform_user_id.clone()),
            identity_key: Set(identity_key.clone()),
            name: Set(identity.name.clone()),
            phone: Set(identity.phone.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        CustomerEntity::insert(row)
            .on_conflict(
                OnConflict::columns([customer::Column::Platform, customer::Column::IdentityKey])
                    .update_columns([
                        customer::Column::Name,
                        customer::Column::Phone,
                        customer::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await?;

        let fallback_via = if identity.platform_user_id.is_some() {
            ResolvedVia::StableId
        } else {
            ResolvedVia::Phone
        };
        let mut resolved = self
            .fetch(conn, identity.platform, &identity_key, fallback_via)
            .await?;
        if resolved.customer.id == candidate_id {
            resolved.via = ResolvedVia::Created;
        }
        Ok(resolved)
    }

    async fn fetch<C: ConnectionTrait>(
        &self,
        conn: &C,
        platform: Platform,
        identity_key: &str,
        via: ResolvedVia,
    ) -> Result<ResolvedCustomer, ServiceError> {
        let customer = CustomerEntity::find()
            .filter(customer::Column::Platform.eq(platform))
            .filter(customer::Column::IdentityKey.eq(identity_key))
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "customer {identity_key} on {platform} disappeared after write"
                ))
            })?;
        Ok(ResolvedCustomer { customer, via })
    }

    /// Loads a customer by id.
    #[instrument(skip(self))]
    pub async fn get_customer(&self, customer_id: Uuid) -> Result<CustomerModel, ServiceError> {
        CustomerEntity::find_by_id(customer_id)
            .one(&*self.db_pool)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {customer_id} not found")))
    }
}
