//! Database migrations.

pub use sea_orm_migration::*;

mod m20250214_000001_create_package_table;
mod m20250214_000002_create_cache_table;
mod m20250214_000003_create_download_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250214_000001_create_package_table::Migration),
            Box::new(m20250214_000002_create_cache_table::Migration),
            Box::new(m20250214_000003_create_download_table::Migration),
        ]
    }
}
