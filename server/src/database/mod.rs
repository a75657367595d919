//! The metadata index and usage ledger.
//!
//! Three tables: `package`, `cache` and `download`, kept in lock-step
//! with the blob store. Cache rows are never hard-deleted; eviction
//! flips the `deleted` tombstone so historical download rows stay
//! referentially intact.

pub mod entity;
pub mod migration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::query::{QueryOrder, QuerySelect};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveValue::Set, Condition, ConnectionTrait, DatabaseConnection, FromQueryResult, JoinType,
    Order, TransactionTrait,
};

use crate::archive::Sha;
use crate::error::{ServerError, ServerResult};
use entity::cache::{self, CacheModel, Entity as Cache};
use entity::download::{self, DownloadModel, Entity as Download};
use entity::package::{self, Entity as Package, PackageModel};

/// Facts recorded about a cache when an upload completes.
#[derive(Debug, Clone)]
pub struct NewCache {
    pub sha: Sha,
    pub package_id: i64,
    pub created: DateTime<Utc>,
    pub ip: String,
    pub user: String,
    pub size: u64,
}

/// Hot-path operations of the metadata store.
#[async_trait]
pub trait VcacheDatabase: Send + Sync {
    /// Returns the id of the named package, creating the row if
    /// needed. Idempotent.
    async fn get_or_add_package_id(&self, name: &str) -> ServerResult<i64>;

    async fn get_cache_id(&self, sha: &Sha) -> ServerResult<Option<i64>>;

    /// Records an upload. A tombstoned row with the same sha is
    /// revived in place so the unique sha constraint and historical
    /// download references both hold.
    async fn add_cache(&self, new: NewCache) -> ServerResult<CacheModel>;

    /// Appends to the download ledger.
    async fn add_download(
        &self,
        cache_id: i64,
        ip: &str,
        user: &str,
        time: DateTime<Utc>,
    ) -> ServerResult<DownloadModel>;

    /// Bumps last-used and the download counters of the cache and its
    /// package in one transaction.
    async fn update_last_use(&self, cache_id: i64, now: DateTime<Utc>) -> ServerResult<()>;
}

#[async_trait]
impl VcacheDatabase for DatabaseConnection {
    async fn get_or_add_package_id(&self, name: &str) -> ServerResult<i64> {
        if let Some(pkg) = Package::find()
            .filter(package::Column::Name.eq(name))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
        {
            return Ok(pkg.id);
        }

        let row = package::ActiveModel {
            name: Set(name.to_owned()),
            last_used: Set(None),
            downloads: Set(0),
            ..Default::default()
        };
        match Package::insert(row).exec(self).await {
            Ok(result) => Ok(result.last_insert_id),
            // Lost an insert race; the row exists now.
            Err(_) => Package::find()
                .filter(package::Column::Name.eq(name))
                .one(self)
                .await
                .map_err(ServerError::database_error)?
                .map(|pkg| pkg.id)
                .ok_or(ServerError::InternalServerError),
        }
    }

    async fn get_cache_id(&self, sha: &Sha) -> ServerResult<Option<i64>> {
        Ok(Cache::find()
            .filter(cache::Column::Sha.eq(sha.as_str()))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
            .map(|row| row.id))
    }

    async fn add_cache(&self, new: NewCache) -> ServerResult<CacheModel> {
        if let Some(existing) = Cache::find()
            .filter(cache::Column::Sha.eq(new.sha.as_str()))
            .one(self)
            .await
            .map_err(ServerError::database_error)?
        {
            let mut row: cache::ActiveModel = existing.into();
            row.package_id = Set(new.package_id);
            row.created = Set(new.created);
            row.ip = Set(new.ip);
            row.user = Set(new.user);
            row.size = Set(new.size as i64);
            row.deleted = Set(false);
            return row.update(self).await.map_err(ServerError::database_error);
        }

        let row = cache::ActiveModel {
            sha: Set(new.sha.to_string()),
            package_id: Set(new.package_id),
            created: Set(new.created),
            ip: Set(new.ip),
            user: Set(new.user),
            last_used: Set(None),
            downloads: Set(0),
            size: Set(new.size as i64),
            deleted: Set(false),
            ..Default::default()
        };
        row.insert(self).await.map_err(ServerError::database_error)
    }

    async fn add_download(
        &self,
        cache_id: i64,
        ip: &str,
        user: &str,
        time: DateTime<Utc>,
    ) -> ServerResult<DownloadModel> {
        let row = download::ActiveModel {
            cache_id: Set(cache_id),
            ip: Set(ip.to_owned()),
            user: Set(user.to_owned()),
            time: Set(time),
            ..Default::default()
        };
        row.insert(self).await.map_err(ServerError::database_error)
    }

    async fn update_last_use(&self, cache_id: i64, now: DateTime<Utc>) -> ServerResult<()> {
        let txn = self.begin().await.map_err(ServerError::database_error)?;

        let cache = Cache::find_by_id(cache_id)
            .one(&txn)
            .await
            .map_err(ServerError::database_error)?
            .ok_or(ServerError::NotFound)?;

        Cache::update_many()
            .col_expr(cache::Column::LastUsed, Expr::value(now))
            .col_expr(
                cache::Column::Downloads,
                Expr::col(cache::Column::Downloads).add(1),
            )
            .filter(cache::Column::Id.eq(cache_id))
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

        Package::update_many()
            .col_expr(package::Column::LastUsed, Expr::value(now))
            .col_expr(
                package::Column::Downloads,
                Expr::col(package::Column::Downloads).add(1),
            )
            .filter(package::Column::Id.eq(cache.package_id))
            .exec(&txn)
            .await
            .map_err(ServerError::database_error)?;

        txn.commit().await.map_err(ServerError::database_error)
    }
}

/// `SUM(size)` over non-deleted caches, optionally of one package.
pub async fn total_size<C: ConnectionTrait>(
    db: &C,
    package_id: Option<i64>,
) -> ServerResult<u64> {
    #[derive(FromQueryResult)]
    struct Total {
        total: Option<i64>,
    }

    let mut query = Cache::find()
        .select_only()
        .column_as(cache::Column::Size.sum(), "total")
        .filter(cache::Column::Deleted.eq(false));
    if let Some(id) = package_id {
        query = query.filter(cache::Column::PackageId.eq(id));
    }

    let total = query
        .into_model::<Total>()
        .one(db)
        .await
        .map_err(ServerError::database_error)?
        .and_then(|row| row.total)
        .unwrap_or(0);
    Ok(total.max(0) as u64)
}

/// Per-package size totals exceeding a ceiling, for the per-package
/// eviction policy.
#[derive(Debug, FromQueryResult)]
pub struct PackageTotal {
    pub total: i64,
    pub name: String,
    pub package_id: i64,
}

pub async fn package_totals<C: ConnectionTrait>(
    db: &C,
    exceeding: u64,
) -> ServerResult<Vec<PackageTotal>> {
    Cache::find()
        .select_only()
        .column_as(cache::Column::Size.sum(), "total")
        .column_as(package::Column::Name, "name")
        .column_as(cache::Column::PackageId, "package_id")
        .join(JoinType::InnerJoin, cache::Relation::Package.def())
        .filter(cache::Column::Deleted.eq(false))
        .group_by(cache::Column::PackageId)
        .having(Expr::expr(cache::Column::Size.sum()).gt(exceeding as i64))
        .into_model::<PackageTotal>()
        .all(db)
        .await
        .map_err(ServerError::database_error)
}

/// Non-deleted caches in eviction order: least recently used first,
/// never-used before everything, ties broken oldest-created first.
pub async fn eviction_candidates<C: ConnectionTrait>(
    db: &C,
    package_id: Option<i64>,
) -> ServerResult<Vec<CacheModel>> {
    let mut query = Cache::find()
        .filter(cache::Column::Deleted.eq(false))
        .order_by_asc(cache::Column::LastUsed)
        .order_by_asc(cache::Column::Created);
    if let Some(id) = package_id {
        query = query.filter(cache::Column::PackageId.eq(id));
    }
    query.all(db).await.map_err(ServerError::database_error)
}

/// Non-deleted caches created before the cutoff (max-age policy).
pub async fn caches_created_before<C: ConnectionTrait>(
    db: &C,
    cutoff: DateTime<Utc>,
) -> ServerResult<Vec<CacheModel>> {
    Cache::find()
        .filter(cache::Column::Deleted.eq(false))
        .filter(cache::Column::Created.lt(cutoff))
        .all(db)
        .await
        .map_err(ServerError::database_error)
}

/// Non-deleted caches last used before the cutoff; never-used counts
/// as older than any cutoff (max-unused policy).
pub async fn caches_unused_since<C: ConnectionTrait>(
    db: &C,
    cutoff: DateTime<Utc>,
) -> ServerResult<Vec<CacheModel>> {
    Cache::find()
        .filter(cache::Column::Deleted.eq(false))
        .filter(
            Condition::any()
                .add(cache::Column::LastUsed.is_null())
                .add(cache::Column::LastUsed.lt(cutoff)),
        )
        .all(db)
        .await
        .map_err(ServerError::database_error)
}

/// Tombstones one cache row.
pub async fn mark_deleted<C: ConnectionTrait>(db: &C, cache_id: i64) -> ServerResult<()> {
    Cache::update_many()
        .col_expr(cache::Column::Deleted, Expr::value(true))
        .filter(cache::Column::Id.eq(cache_id))
        .exec(db)
        .await
        .map_err(ServerError::database_error)?;
    Ok(())
}

/// All package rows, for the index page ledger columns.
pub async fn package_stats(db: &DatabaseConnection) -> ServerResult<Vec<PackageModel>> {
    Package::find()
        .all(db)
        .await
        .map_err(ServerError::database_error)
}

/// All cache rows of one package name, tombstoned ones included.
pub async fn caches_of_package(
    db: &DatabaseConnection,
    name: &str,
) -> ServerResult<Vec<CacheModel>> {
    Cache::find()
        .join(JoinType::InnerJoin, cache::Relation::Package.def())
        .filter(package::Column::Name.eq(name))
        .all(db)
        .await
        .map_err(ServerError::database_error)
}

pub async fn cache_by_sha(
    db: &DatabaseConnection,
    sha: &Sha,
) -> ServerResult<Option<CacheModel>> {
    Cache::find()
        .filter(cache::Column::Sha.eq(sha.as_str()))
        .one(db)
        .await
        .map_err(ServerError::database_error)
}

/// A column of the download ledger page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerColumn {
    Time,
    Package,
    User,
    Ip,
    Sha,
}

/// One row of the download ledger page.
#[derive(Debug, FromQueryResult)]
pub struct LedgerRow {
    pub time: ChronoDateTimeUtc,
    pub sha: String,
    pub package: String,
    pub user: String,
    pub ip: String,
}

/// One page of the download ledger, joined with cache and package.
pub async fn downloads_page(
    db: &DatabaseConnection,
    filter: Option<(LedgerColumn, String)>,
    order_by: LedgerColumn,
    descending: bool,
    offset: u64,
    limit: u64,
) -> ServerResult<Vec<LedgerRow>> {
    let mut query = Download::find()
        .select_only()
        .column_as(download::Column::Time, "time")
        .column_as(download::Column::Ip, "ip")
        .column_as(download::Column::User, "user")
        .column_as(cache::Column::Sha, "sha")
        .column_as(package::Column::Name, "package")
        .join(JoinType::InnerJoin, download::Relation::Cache.def())
        .join(JoinType::InnerJoin, cache::Relation::Package.def());

    if let Some((column, value)) = filter {
        query = match column {
            LedgerColumn::Time => query.filter(download::Column::Time.eq(value)),
            LedgerColumn::Package => query.filter(package::Column::Name.eq(value)),
            LedgerColumn::User => query.filter(download::Column::User.eq(value)),
            LedgerColumn::Ip => query.filter(download::Column::Ip.eq(value)),
            LedgerColumn::Sha => query.filter(cache::Column::Sha.eq(value)),
        };
    }

    let order = if descending { Order::Desc } else { Order::Asc };
    query = match order_by {
        LedgerColumn::Time => query.order_by(download::Column::Time, order),
        LedgerColumn::Package => query.order_by(package::Column::Name, order),
        LedgerColumn::User => query.order_by(download::Column::User, order),
        LedgerColumn::Ip => query.order_by(download::Column::Ip, order),
        LedgerColumn::Sha => query.order_by(cache::Column::Sha, order),
    };

    query
        .offset(offset)
        .limit(limit)
        .into_model::<LedgerRow>()
        .all(db)
        .await
        .map_err(ServerError::database_error)
}
