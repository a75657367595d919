//! A package: the family of caches sharing one vcpkg port name.

use sea_orm::entity::prelude::*;

pub type PackageModel = Model;

#[derive(Debug, Clone, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "package")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    /// The vcpkg port name. Rows are created lazily on first
    /// reference and never deleted.
    #[sea_orm(unique)]
    pub name: String,

    /// When any cache of this package was last downloaded. `None`
    /// means never.
    pub last_used: Option<ChronoDateTimeUtc>,

    /// Running download count across all caches of this package.
    pub downloads: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cache::Entity")]
    Cache,
}

impl Related<super::cache::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cache.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
