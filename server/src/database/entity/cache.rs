//! A cache: one stored archive plus its metadata.

use sea_orm::entity::prelude::*;

pub type CacheModel = Model;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cache")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The build fingerprint addressing the archive.
    #[sea_orm(unique)]
    pub sha: String,

    #[sea_orm(indexed)]
    pub package_id: i64,

    /// The archive's mtime at upload time.
    pub created: ChronoDateTimeUtc,

    /// Uploader address, informational.
    pub ip: String,

    /// Uploader username resolved through the auth map, informational.
    pub user: String,

    /// When this cache was last downloaded. `None` means never.
    pub last_used: Option<ChronoDateTimeUtc>,

    pub downloads: i64,

    /// Archive size in bytes.
    pub size: i64,

    /// Tombstone. The row outlives the archive so that historical
    /// download rows keep a valid reference.
    pub deleted: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::package::Entity",
        from = "Column::PackageId",
        to = "super::package::Column::Id"
    )]
    Package,

    #[sea_orm(has_many = "super::download::Entity")]
    Download,
}

impl Related<super::package::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Package.def()
    }
}

impl Related<super::download::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Download.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
