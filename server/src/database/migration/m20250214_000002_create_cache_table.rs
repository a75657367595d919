use sea_orm_migration::prelude::*;

use crate::database::entity::cache::*;
use crate::database::entity::package;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250214_000002_create_cache_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Entity)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Column::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Column::Sha)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Column::PackageId).big_integer().not_null())
                    .col(
                        ColumnDef::new(Column::Created)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Column::Ip).string().not_null())
                    .col(ColumnDef::new(Column::User).string().not_null())
                    .col(ColumnDef::new(Column::LastUsed).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Column::Downloads)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Column::Size).big_integer().not_null())
                    .col(
                        ColumnDef::new(Column::Deleted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_cache_package")
                            .from_tbl(Entity)
                            .from_col(Column::PackageId)
                            .to_tbl(package::Entity)
                            .to_col(package::Column::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-cache-package")
                    .table(Entity)
                    .col(Column::PackageId)
                    .to_owned(),
            )
            .await
    }
}
