pub use sea_orm_migration::prelude::*;

mod m20250301_000001_create_taxonomy;
mod m20250301_000002_create_movie;
mod m20250301_000003_create_news;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_taxonomy::Migration),
            Box::new(m20250301_000002_create_movie::Migration),
            Box::new(m20250301_000003_create_news::Migration),
        ]
    }
}
