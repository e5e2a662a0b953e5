use sea_orm_migration::{prelude::*, schema::*};

use crate::m20250301_000001_create_taxonomy::{Attribute, Genre, Label};

pub(crate) const MOVIE_NAME_LEN: u32 = 32;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movie::Table)
                    .if_not_exists()
                    .col(pk_auto(Movie::Id))
                    .col(string_len(Movie::DisplayName, MOVIE_NAME_LEN))
                    .col(string_len(Movie::InternalName, MOVIE_NAME_LEN).unique_key())
                    .col(json(Movie::Director))
                    .col(text_null(Movie::Synopsis))
                    .col(json_null(Movie::Detail))
                    .col(json_null(Movie::CastInfo))
                    .col(string_null(Movie::Poster))
                    .col(big_integer(Movie::CreatedAt))
                    .col(big_integer(Movie::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movie_display_name")
                    .table(Movie::Table)
                    .col(Movie::DisplayName)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(join_table(
                MovieLink::MovieLabel,
                "movie_label",
                Label::Table,
                Label::Id,
            ))
            .await?;
        manager
            .create_table(join_table(
                MovieLink::MovieGenre,
                "movie_genre",
                Genre::Table,
                Genre::Id,
            ))
            .await?;
        manager
            .create_table(join_table(
                MovieLink::MovieAttribute,
                "movie_attribute",
                Attribute::Table,
                Attribute::Id,
            ))
            .await?;

        for (table, name) in [
            (MovieLink::MovieLabel, "idx_movie_label_tag"),
            (MovieLink::MovieGenre, "idx_movie_genre_tag"),
            (MovieLink::MovieAttribute, "idx_movie_attribute_tag"),
        ] {
            manager
                .create_index(
                    Index::create().name(name).table(table).col(MovieLink::TagId).to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [MovieLink::MovieAttribute, MovieLink::MovieGenre, MovieLink::MovieLabel] {
            manager.drop_table(Table::drop().table(table).to_owned()).await?;
        }
        manager.drop_table(Table::drop().table(Movie::Table).to_owned()).await?;
        Ok(())
    }
}

/// Join rows carry no data of their own; both foreign keys cascade so that
/// removing either side only drops the association.
fn join_table<T, C>(table: MovieLink, name: &str, tag_table: T, tag_id: C) -> TableCreateStatement
where
    T: IntoTableRef,
    C: IntoIden,
{
    Table::create()
        .table(table)
        .if_not_exists()
        .col(integer(MovieLink::MovieId))
        .col(integer(MovieLink::TagId))
        .primary_key(Index::create().col(MovieLink::MovieId).col(MovieLink::TagId))
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{name}_movie"))
                .from(table, MovieLink::MovieId)
                .to(Movie::Table, Movie::Id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{name}_tag"))
                .from(table, MovieLink::TagId)
                .to(tag_table, tag_id)
                .on_delete(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

#[derive(DeriveIden)]
pub(crate) enum Movie {
    Table,
    Id,
    DisplayName,
    InternalName,
    Director,
    Synopsis,
    Detail,
    CastInfo,
    Poster,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden, Clone, Copy)]
enum MovieLink {
    MovieLabel,
    MovieGenre,
    MovieAttribute,
    MovieId,
    TagId,
}
