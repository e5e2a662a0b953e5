use std::collections::HashMap;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, NotSet,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use tracing::{debug, info};

use crate::{
    entities::{movie, news_movie},
    error::{CatalogError, CatalogResult},
    listing::{MovieFilter, MovieQuery},
    models::{MOVIE_NAME_MAX, Movie, MoviePatch, NewMovie, Tag, TagKind},
};

/// Runs `$body` with `$tag` bound to the entity module of the given tag kind
/// and `$link` to its movie join table. All three pairs share column names.
macro_rules! with_tag_tables {
    ($kind:expr, |$tag:ident, $link:ident| $body:expr) => {
        match $kind {
            $crate::models::TagKind::Label => {
                #[allow(unused_imports)]
                use $crate::entities::{label as $tag, movie_label as $link};
                $body
            },
            $crate::models::TagKind::Genre => {
                #[allow(unused_imports)]
                use $crate::entities::{genre as $tag, movie_genre as $link};
                $body
            },
            $crate::models::TagKind::Attribute => {
                #[allow(unused_imports)]
                use $crate::entities::{attribute as $tag, movie_attribute as $link};
                $body
            },
        }
    };
}

pub(crate) use with_tag_tables;

#[derive(Clone)]
pub struct Catalog {
    db: DatabaseConnection,
    page_size: u64,
}

impl Catalog {
    pub fn new(db: DatabaseConnection, page_size: u64) -> Self {
        Self { db, page_size: page_size.max(1) }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn create_movie(&self, fields: NewMovie) -> CatalogResult<Movie> {
        let display_name = required_text("display_name", &fields.display_name, MOVIE_NAME_MAX)?;
        let internal_name = required_text("internal_name", &fields.internal_name, MOVIE_NAME_MAX)?;

        let txn = self.db.begin().await?;
        ensure_internal_name_free(&txn, &internal_name, None).await?;

        let now = now_micros();
        let row = movie::ActiveModel {
            id: NotSet,
            display_name: Set(display_name),
            internal_name: Set(internal_name),
            director: Set(fields.director.clone()),
            synopsis: Set(fields.synopsis.clone()),
            detail: Set(fields.detail.clone()),
            cast_info: Set(fields.cast.clone()),
            poster: Set(fields.poster.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for kind in TagKind::ALL {
            replace_links(&txn, kind, row.id, fields.tag_ids(kind)).await?;
        }

        let movie = hydrate_one(&txn, row).await?;
        txn.commit().await?;

        info!(movie_id = movie.id, internal_name = %movie.internal_name, "movie created");
        Ok(movie)
    }

    pub async fn get_movie(&self, id: i32) -> CatalogResult<Movie> {
        let row = find_movie(&self.db, id).await?;
        hydrate_one(&self.db, row).await
    }

    pub async fn update_movie(&self, id: i32, patch: MoviePatch) -> CatalogResult<Movie> {
        let txn = self.db.begin().await?;
        let existing = find_movie(&txn, id).await?;
        let previous_update = existing.updated_at;
        let mut active: movie::ActiveModel = existing.clone().into();

        if let Some(name) = &patch.display_name {
            active.display_name = Set(required_text("display_name", name, MOVIE_NAME_MAX)?);
        }
        if let Some(name) = &patch.internal_name {
            let name = required_text("internal_name", name, MOVIE_NAME_MAX)?;
            if name != existing.internal_name {
                ensure_internal_name_free(&txn, &name, Some(id)).await?;
            }
            active.internal_name = Set(name);
        }
        if let Some(director) = &patch.director {
            active.director = Set(director.clone());
        }
        if let Some(synopsis) = &patch.synopsis {
            active.synopsis = Set(synopsis.clone());
        }
        if let Some(detail) = &patch.detail {
            active.detail = Set(detail.clone());
        }
        if let Some(cast) = &patch.cast {
            active.cast_info = Set(cast.clone());
        }
        if let Some(poster) = &patch.poster {
            active.poster = Set(poster.clone());
        }
        active.updated_at = Set(next_update(previous_update));

        let row = active.update(&txn).await?;
        for kind in TagKind::ALL {
            if let Some(ids) = patch.tag_ids(kind) {
                replace_links(&txn, kind, id, ids).await?;
            }
        }

        let movie = hydrate_one(&txn, row).await?;
        txn.commit().await?;

        info!(movie_id = id, updated_at = movie.updated_at, "movie updated");
        Ok(movie)
    }

    pub async fn set_poster(&self, movie_id: i32, poster: Option<String>) -> CatalogResult<Movie> {
        self.update_movie(movie_id, MoviePatch { poster: Some(poster), ..Default::default() })
            .await
    }

    pub async fn delete_movie(&self, id: i32) -> CatalogResult<()> {
        let txn = self.db.begin().await?;
        find_movie(&txn, id).await?;

        for kind in TagKind::ALL {
            with_tag_tables!(kind, |tag, link| {
                link::Entity::delete_many()
                    .filter(link::Column::MovieId.eq(id))
                    .exec(&txn)
                    .await?;
            });
        }
        let news_links = news_movie::Entity::delete_many()
            .filter(news_movie::Column::MovieId.eq(id))
            .exec(&txn)
            .await?;
        movie::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(movie_id = id, news_links = news_links.rows_affected, "movie deleted");
        Ok(())
    }

    pub async fn attach_tag(&self, movie_id: i32, kind: TagKind, tag_id: i32) -> CatalogResult<()> {
        let txn = self.db.begin().await?;
        find_movie(&txn, movie_id).await?;
        let inserted = insert_link(&txn, kind, movie_id, tag_id).await?;
        txn.commit().await?;

        debug!(movie_id, tag_id, kind = kind.entity_name(), inserted, "tag attached");
        Ok(())
    }

    pub async fn detach_tag(&self, movie_id: i32, kind: TagKind, tag_id: i32) -> CatalogResult<()> {
        find_movie(&self.db, movie_id).await?;
        let removed = with_tag_tables!(kind, |tag, link| {
            if tag::Entity::find_by_id(tag_id).one(&self.db).await?.is_none() {
                return Err(CatalogError::not_found(kind.entity_name(), tag_id));
            }
            link::Entity::delete_many()
                .filter(link::Column::MovieId.eq(movie_id))
                .filter(link::Column::TagId.eq(tag_id))
                .exec(&self.db)
                .await?
                .rows_affected
        });

        debug!(movie_id, tag_id, kind = kind.entity_name(), removed, "tag detached");
        Ok(())
    }

    pub fn list_movies(&self, filter: MovieFilter) -> MovieQuery {
        MovieQuery::new(self.db.clone(), filter, self.page_size)
    }
}

pub(crate) async fn find_movie<C: ConnectionTrait>(conn: &C, id: i32) -> CatalogResult<movie::Model> {
    movie::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| CatalogError::not_found("movie", id))
}

async fn ensure_internal_name_free<C: ConnectionTrait>(
    conn: &C,
    internal_name: &str,
    except: Option<i32>,
) -> CatalogResult<()> {
    let mut query = movie::Entity::find().filter(movie::Column::InternalName.eq(internal_name));
    if let Some(id) = except {
        query = query.filter(movie::Column::Id.ne(id));
    }
    if query.one(conn).await?.is_some() {
        return Err(CatalogError::Validation(format!(
            "a movie with internal_name '{internal_name}' already exists"
        )));
    }
    Ok(())
}

/// Inserts a join row unless it already exists. Returns whether a row was added.
async fn insert_link<C: ConnectionTrait>(
    conn: &C,
    kind: TagKind,
    movie_id: i32,
    tag_id: i32,
) -> CatalogResult<bool> {
    with_tag_tables!(kind, |tag, link| {
        if tag::Entity::find_by_id(tag_id).one(conn).await?.is_none() {
            return Err(CatalogError::not_found(kind.entity_name(), tag_id));
        }
        if link::Entity::find_by_id((movie_id, tag_id)).one(conn).await?.is_some() {
            return Ok(false);
        }
        link::Entity::insert(link::ActiveModel { movie_id: Set(movie_id), tag_id: Set(tag_id) })
            .exec_without_returning(conn)
            .await?;
        Ok(true)
    })
}

async fn replace_links<C: ConnectionTrait>(
    conn: &C,
    kind: TagKind,
    movie_id: i32,
    tag_ids: &[i32],
) -> CatalogResult<()> {
    with_tag_tables!(kind, |tag, link| {
        link::Entity::delete_many().filter(link::Column::MovieId.eq(movie_id)).exec(conn).await?;
    });
    for &tag_id in tag_ids {
        insert_link(conn, kind, movie_id, tag_id).await?;
    }
    Ok(())
}

/// Loads the tag sets of every movie in `movie_ids`, keyed by movie id.
async fn tag_sets<C: ConnectionTrait>(
    conn: &C,
    kind: TagKind,
    movie_ids: &[i32],
) -> CatalogResult<HashMap<i32, Vec<Tag>>> {
    let mut sets: HashMap<i32, Vec<Tag>> = HashMap::new();
    if movie_ids.is_empty() {
        return Ok(sets);
    }

    with_tag_tables!(kind, |tag, link| {
        let links = link::Entity::find()
            .filter(link::Column::MovieId.is_in(movie_ids.iter().copied()))
            .all(conn)
            .await?;
        if links.is_empty() {
            return Ok(sets);
        }

        let tags: HashMap<i32, Tag> = tag::Entity::find()
            .filter(tag::Column::Id.is_in(links.iter().map(|l| l.tag_id)))
            .order_by_asc(tag::Column::Id)
            .all(conn)
            .await?
            .into_iter()
            .map(|m| (m.id, Tag { id: m.id, name: m.name, created_at: m.created_at }))
            .collect();

        for l in links {
            if let Some(t) = tags.get(&l.tag_id) {
                sets.entry(l.movie_id).or_default().push(t.clone());
            }
        }
    });

    for set in sets.values_mut() {
        set.sort_by_key(|t| t.id);
    }
    Ok(sets)
}

pub(crate) async fn hydrate<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<movie::Model>,
) -> CatalogResult<Vec<Movie>> {
    let ids: Vec<i32> = rows.iter().map(|r| r.id).collect();
    let mut labels = tag_sets(conn, TagKind::Label, &ids).await?;
    let mut genres = tag_sets(conn, TagKind::Genre, &ids).await?;
    let mut attributes = tag_sets(conn, TagKind::Attribute, &ids).await?;

    Ok(rows
        .into_iter()
        .map(|row| Movie {
            labels: labels.remove(&row.id).unwrap_or_default(),
            genres: genres.remove(&row.id).unwrap_or_default(),
            attributes: attributes.remove(&row.id).unwrap_or_default(),
            id: row.id,
            display_name: row.display_name,
            internal_name: row.internal_name,
            director: row.director,
            synopsis: row.synopsis,
            detail: row.detail,
            cast: row.cast_info,
            poster: row.poster,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect())
}

async fn hydrate_one<C: ConnectionTrait>(conn: &C, row: movie::Model) -> CatalogResult<Movie> {
    let id = row.id;
    hydrate(conn, vec![row])
        .await?
        .pop()
        .ok_or_else(|| CatalogError::not_found("movie", id))
}

/// Trims `value` and checks it is present and at most `max` characters.
pub(crate) fn required_text(field: &str, value: &str, max: usize) -> CatalogResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CatalogError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max {
        return Err(CatalogError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value.to_string())
}

pub(crate) fn now_micros() -> i64 {
    jiff::Timestamp::now().as_microsecond()
}

/// Update timestamps strictly increase, even within one clock tick.
pub(crate) fn next_update(previous: i64) -> i64 {
    now_micros().max(previous.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use sea_orm::{EntityTrait, PaginatorTrait};
    use serde_json::json;

    use super::*;
    use crate::{db, entities::movie_label, models::Director};

    async fn catalog() -> Catalog {
        Catalog::new(db::memory().await, 2)
    }

    fn inception() -> NewMovie {
        NewMovie {
            director: [("director", "Christopher Nolan")].into_iter().collect::<Director>(),
            ..NewMovie::new("Inception", "inception_2010")
        }
    }

    #[tokio::test]
    async fn create_movie_sets_timestamps_and_empty_sets() {
        let catalog = catalog().await;
        let movie = catalog.create_movie(inception()).await.unwrap();

        assert_eq!(movie.display_name, "Inception");
        assert_eq!(movie.internal_name, "inception_2010");
        assert_eq!(movie.director.0.get("director").map(String::as_str), Some("Christopher Nolan"));
        assert!(movie.created_at > 0);
        assert_eq!(movie.created_at, movie.updated_at);
        assert!(movie.labels.is_empty());
        assert!(movie.genres.is_empty());
        assert!(movie.attributes.is_empty());
    }

    #[tokio::test]
    async fn duplicate_internal_name_is_rejected() {
        let catalog = catalog().await;
        catalog.create_movie(inception()).await.unwrap();

        let err = catalog
            .create_movie(NewMovie::new("Inception (re-release)", "inception_2010"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        // Display names may repeat.
        catalog.create_movie(NewMovie::new("Inception", "inception_imax")).await.unwrap();
    }

    #[tokio::test]
    async fn unique_index_violation_maps_to_validation() {
        let catalog = catalog().await;
        let movie = catalog.create_movie(inception()).await.unwrap();

        // Writing straight through the entity skips the name check, so the
        // unique index is what rejects the row.
        let mut duplicate: movie::ActiveModel =
            find_movie(catalog.db(), movie.id).await.unwrap().into();
        duplicate.id = NotSet;
        duplicate.display_name = Set("Inception (IMAX)".to_string());
        let err = duplicate.insert(catalog.db()).await.unwrap_err();

        match CatalogError::from(err) {
            CatalogError::Validation(msg) => assert!(msg.starts_with("duplicate value"), "{msg}"),
            other => panic!("expected a validation error, got {other:?}"),
        }
        assert_eq!(movie::Entity::find().count(catalog.db()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_names_are_rejected() {
        let catalog = catalog().await;

        let err = catalog.create_movie(NewMovie::new("", "x")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        let err = catalog.create_movie(NewMovie::new("X", "   ")).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        let err = catalog.create_movie(NewMovie::new("X", "x".repeat(33))).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
    }

    #[tokio::test]
    async fn update_refreshes_only_on_success() {
        let catalog = catalog().await;
        let movie = catalog.create_movie(inception()).await.unwrap();
        let other = catalog.create_movie(NewMovie::new("Memento", "memento_2000")).await.unwrap();

        let updated = catalog
            .update_movie(
                movie.id,
                MoviePatch {
                    synopsis: Some(Some("A thief who steals secrets.".into())),
                    detail: Some(Some(json!({"runtime": 148, "languages": ["en", "ja"]}))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.updated_at > movie.updated_at);
        assert_eq!(updated.created_at, movie.created_at);
        assert_eq!(updated.detail, Some(json!({"runtime": 148, "languages": ["en", "ja"]})));

        let again = catalog.update_movie(movie.id, MoviePatch::default()).await.unwrap();
        assert!(again.updated_at > updated.updated_at);

        let err = catalog
            .update_movie(
                movie.id,
                MoviePatch { internal_name: Some(other.internal_name.clone()), ..Default::default() },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        let unchanged = catalog.get_movie(movie.id).await.unwrap();
        assert_eq!(unchanged.updated_at, again.updated_at);
        assert_eq!(unchanged.internal_name, "inception_2010");
    }

    #[tokio::test]
    async fn update_can_clear_nullable_fields() {
        let catalog = catalog().await;
        let movie = catalog
            .create_movie(NewMovie { synopsis: Some("dreams".into()), ..inception() })
            .await
            .unwrap();

        let cleared = catalog
            .update_movie(movie.id, MoviePatch { synopsis: Some(None), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(cleared.synopsis, None);
    }

    #[tokio::test]
    async fn unknown_movie_is_not_found() {
        let catalog = catalog().await;

        let err = catalog.update_movie(42, MoviePatch::default()).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { entity: "movie", id: 42 }));
        let err = catalog.delete_movie(42).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
        let err = catalog.get_movie(42).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }

    #[tokio::test]
    async fn attaching_twice_keeps_one_row() {
        let catalog = catalog().await;
        let movie = catalog.create_movie(inception()).await.unwrap();
        let label = catalog.create_tag(TagKind::Label, "mind-bending").await.unwrap();

        catalog.attach_tag(movie.id, TagKind::Label, label.id).await.unwrap();
        catalog.attach_tag(movie.id, TagKind::Label, label.id).await.unwrap();

        let rows = movie_label::Entity::find().count(catalog.db()).await.unwrap();
        assert_eq!(rows, 1);
        let movie = catalog.get_movie(movie.id).await.unwrap();
        assert_eq!(movie.labels, vec![label.clone()]);

        catalog.detach_tag(movie.id, TagKind::Label, label.id).await.unwrap();
        catalog.detach_tag(movie.id, TagKind::Label, label.id).await.unwrap();
        assert!(catalog.get_movie(movie.id).await.unwrap().labels.is_empty());
    }

    #[tokio::test]
    async fn attach_unknown_tag_is_not_found() {
        let catalog = catalog().await;
        let movie = catalog.create_movie(inception()).await.unwrap();

        let err = catalog.attach_tag(movie.id, TagKind::Genre, 99).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { entity: "genre", id: 99 }));
        let err = catalog.attach_tag(99, TagKind::Genre, 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { entity: "movie", .. }));
    }

    #[tokio::test]
    async fn patch_tag_lists_replace_the_set() {
        let catalog = catalog().await;
        let scifi = catalog.create_tag(TagKind::Genre, "sci-fi").await.unwrap();
        let heist = catalog.create_tag(TagKind::Genre, "heist").await.unwrap();
        let imax = catalog.create_tag(TagKind::Attribute, "imax").await.unwrap();

        let movie = catalog
            .create_movie(NewMovie {
                genres: vec![scifi.id, heist.id],
                attributes: vec![imax.id],
                ..inception()
            })
            .await
            .unwrap();
        assert_eq!(movie.genres.len(), 2);
        assert_eq!(movie.attributes, vec![imax.clone()]);

        let movie = catalog
            .update_movie(movie.id, MoviePatch { genres: Some(vec![heist.id]), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(movie.genres, vec![heist]);
        assert_eq!(movie.attributes, vec![imax]);
    }

    #[tokio::test]
    async fn deleting_movie_drops_links_but_keeps_tags() {
        let catalog = catalog().await;
        let label = catalog.create_tag(TagKind::Label, "classic").await.unwrap();
        let movie = catalog
            .create_movie(NewMovie { labels: vec![label.id], ..inception() })
            .await
            .unwrap();

        catalog.delete_movie(movie.id).await.unwrap();

        assert_eq!(movie_label::Entity::find().count(catalog.db()).await.unwrap(), 0);
        assert_eq!(catalog.get_tag(TagKind::Label, label.id).await.unwrap(), label);
        let remaining: Vec<Movie> =
            catalog.list_movies(MovieFilter::default()).stream().try_collect().await.unwrap();
        assert!(remaining.is_empty());
    }

    #[test]
    fn next_update_is_strictly_increasing() {
        let far_future = now_micros() + 60_000_000;
        assert_eq!(next_update(far_future), far_future + 1);
        assert!(next_update(0) > 0);
    }
}
