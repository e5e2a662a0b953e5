use sea_orm_migration::{prelude::*, schema::*};

use crate::m20250301_000002_create_movie::Movie;

const TITLE_LEN: u32 = 64;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(News::Table)
                    .if_not_exists()
                    .col(pk_auto(News::Id))
                    .col(string_len(News::Title, TITLE_LEN).unique_key())
                    .col(text(News::Body))
                    .col(boolean(News::Hidden).default(false))
                    .col(big_integer(News::CreatedAt))
                    .col(big_integer(News::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(NewsMovie::Table)
                    .if_not_exists()
                    .col(integer(NewsMovie::NewsId))
                    .col(integer(NewsMovie::MovieId))
                    .primary_key(Index::create().col(NewsMovie::NewsId).col(NewsMovie::MovieId))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_news_movie_news")
                            .from(NewsMovie::Table, NewsMovie::NewsId)
                            .to(News::Table, News::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_news_movie_movie")
                            .from(NewsMovie::Table, NewsMovie::MovieId)
                            .to(Movie::Table, Movie::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_news_movie_movie")
                    .table(NewsMovie::Table)
                    .col(NewsMovie::MovieId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(NewsMovie::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(News::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum News {
    Table,
    Id,
    Title,
    Body,
    Hidden,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum NewsMovie {
    Table,
    NewsId,
    MovieId,
}
