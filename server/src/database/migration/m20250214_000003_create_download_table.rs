use sea_orm_migration::prelude::*;

use crate::database::entity::cache;
use crate::database::entity::download::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m20250214_000003_create_download_table"
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
                    .col(ColumnDef::new(Column::CacheId).big_integer().not_null())
                    .col(ColumnDef::new(Column::Ip).string().not_null())
                    .col(ColumnDef::new(Column::User).string().not_null())
                    .col(
                        ColumnDef::new(Column::Time)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKeyCreateStatement::new()
                            .name("fk_download_cache")
                            .from_tbl(Entity)
                            .from_col(Column::CacheId)
                            .to_tbl(cache::Entity)
                            .to_col(cache::Column::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-download-cache")
                    .table(Entity)
                    .col(Column::CacheId)
                    .to_owned(),
            )
            .await
    }
}
