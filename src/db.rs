use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use tracing::info;

use crate::error::AppResult;

const SQLITE_PRAGMAS: [&str; 2] = ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL"];

/// Foreign keys are a per-connection setting in SQLite, so they are switched
/// on for every connection the pool opens rather than once after connecting.
fn options(database_url: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(database_url);
    options.map_sqlx_sqlite_opts(|opts| opts.foreign_keys(true));
    options
}

pub async fn connect_and_migrate(database_url: &str) -> AppResult<DatabaseConnection> {
    let db = Database::connect(options(database_url)).await?;

    if db.get_database_backend() == DbBackend::Sqlite {
        for pragma in SQLITE_PRAGMAS {
            db.execute(Statement::from_string(db.get_database_backend(), pragma.to_string()))
                .await?;
        }
    }

    Migrator::up(&db, None).await?;
    info!(backend = ?db.get_database_backend(), "database ready");
    Ok(db)
}

/// A private in-memory database with the full schema applied.
#[cfg(test)]
pub async fn memory() -> DatabaseConnection {
    let mut options = options("sqlite::memory:");
    // Every pooled connection would otherwise open its own empty database.
    options.max_connections(1).min_connections(1).sqlx_logging(false);

    let db = Database::connect(options).await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    db
}

#[cfg(test)]
mod tests {
    use sea_orm::{EntityTrait, PaginatorTrait};

    use super::*;
    use crate::{
        catalog::Catalog,
        entities::{movie, movie_genre, news_movie},
        models::{NewMovie, NewNews, TagKind},
    };

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let db = memory().await;
        let row = db
            .query_one(Statement::from_string(DbBackend::Sqlite, "PRAGMA foreign_keys".to_string()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.try_get_by_index::<i32>(0).unwrap(), 1);
    }

    #[tokio::test]
    async fn removing_a_movie_row_cascades_to_its_links() {
        let catalog = Catalog::new(memory().await, 10);
        let war = catalog.create_tag(TagKind::Genre, "war").await.unwrap();
        let dunkirk = catalog
            .create_movie(NewMovie { genres: vec![war.id], ..NewMovie::new("Dunkirk", "dunkirk_2017") })
            .await
            .unwrap();
        let item = catalog
            .create_news(NewNews {
                related_movies: vec![dunkirk.id],
                ..NewNews::new("Dunkirk in 70mm", "Limited run.")
            })
            .await
            .unwrap();

        // Bypass the catalog so only the schema is responsible for cleanup.
        movie::Entity::delete_by_id(dunkirk.id).exec(catalog.db()).await.unwrap();

        assert_eq!(movie_genre::Entity::find().count(catalog.db()).await.unwrap(), 0);
        assert_eq!(news_movie::Entity::find().count(catalog.db()).await.unwrap(), 0);
        assert!(catalog.get_news(item.id).await.unwrap().related_movies.is_empty());
        assert_eq!(catalog.get_tag(TagKind::Genre, war.id).await.unwrap().name, "war");
    }
}
