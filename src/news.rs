use std::collections::{BTreeMap, BTreeSet};

use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, NotSet, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use tracing::{debug, info};

use crate::{
    catalog::{Catalog, find_movie, next_update, now_micros, required_text},
    entities::{news, news_movie},
    error::{CatalogError, CatalogResult},
    models::{NEWS_BODY_MAX, NEWS_TITLE_MAX, NewNews, NewsItem, NewsPatch},
};

impl Catalog {
    pub async fn create_news(&self, fields: NewNews) -> CatalogResult<NewsItem> {
        let title = required_text("title", &fields.title, NEWS_TITLE_MAX)?;
        let body = required_body(&fields.body)?;

        let txn = self.db().begin().await?;
        ensure_title_free(&txn, &title, None).await?;

        let now = now_micros();
        let row = news::ActiveModel {
            id: NotSet,
            title: Set(title),
            body: Set(body),
            hidden: Set(fields.hidden),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        replace_related(&txn, row.id, &fields.related_movies).await?;

        let item = load(&txn, row).await?;
        txn.commit().await?;

        info!(news_id = item.id, title = %item.title, hidden = item.hidden, "news created");
        Ok(item)
    }

    pub async fn get_news(&self, id: i32) -> CatalogResult<NewsItem> {
        let row = find_news(self.db(), id).await?;
        load(self.db(), row).await
    }

    /// News items ordered by id; hidden ones only when asked for.
    pub async fn list_news(&self, include_hidden: bool) -> CatalogResult<Vec<NewsItem>> {
        let mut query = news::Entity::find().order_by_asc(news::Column::Id);
        if !include_hidden {
            query = query.filter(news::Column::Hidden.eq(false));
        }

        let rows = query.all(self.db()).await?;
        load_many(self.db(), rows).await
    }

    pub async fn update_news(&self, id: i32, patch: NewsPatch) -> CatalogResult<NewsItem> {
        let txn = self.db().begin().await?;
        let existing = find_news(&txn, id).await?;
        let previous_update = existing.updated_at;
        let mut active: news::ActiveModel = existing.clone().into();

        if let Some(title) = &patch.title {
            let title = required_text("title", title, NEWS_TITLE_MAX)?;
            if title != existing.title {
                ensure_title_free(&txn, &title, Some(id)).await?;
            }
            active.title = Set(title);
        }
        if let Some(body) = &patch.body {
            active.body = Set(required_body(body)?);
        }
        if let Some(hidden) = patch.hidden {
            active.hidden = Set(hidden);
        }
        active.updated_at = Set(next_update(previous_update));

        let row = active.update(&txn).await?;
        if let Some(movie_ids) = &patch.related_movies {
            replace_related(&txn, id, movie_ids).await?;
        }

        let item = load(&txn, row).await?;
        txn.commit().await?;

        info!(news_id = id, hidden = item.hidden, "news updated");
        Ok(item)
    }

    pub async fn delete_news(&self, id: i32) -> CatalogResult<()> {
        let txn = self.db().begin().await?;
        find_news(&txn, id).await?;
        news_movie::Entity::delete_many()
            .filter(news_movie::Column::NewsId.eq(id))
            .exec(&txn)
            .await?;
        news::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(news_id = id, "news deleted");
        Ok(())
    }

    pub async fn attach_news_movie(&self, news_id: i32, movie_id: i32) -> CatalogResult<()> {
        let txn = self.db().begin().await?;
        find_news(&txn, news_id).await?;
        let inserted = insert_related(&txn, news_id, movie_id).await?;
        txn.commit().await?;

        debug!(news_id, movie_id, inserted, "movie linked to news");
        Ok(())
    }

    pub async fn detach_news_movie(&self, news_id: i32, movie_id: i32) -> CatalogResult<()> {
        find_news(self.db(), news_id).await?;
        let removed = news_movie::Entity::delete_many()
            .filter(news_movie::Column::NewsId.eq(news_id))
            .filter(news_movie::Column::MovieId.eq(movie_id))
            .exec(self.db())
            .await?
            .rows_affected;

        debug!(news_id, movie_id, removed, "movie unlinked from news");
        Ok(())
    }
}

fn required_body(body: &str) -> CatalogResult<String> {
    if body.trim().is_empty() {
        return Err(CatalogError::Validation("body is required".to_string()));
    }
    if body.chars().count() > NEWS_BODY_MAX {
        return Err(CatalogError::Validation(format!(
            "body must be at most {NEWS_BODY_MAX} characters"
        )));
    }
    // Markdown is whitespace sensitive, so the body is kept verbatim.
    Ok(body.to_string())
}

async fn find_news<C: ConnectionTrait>(conn: &C, id: i32) -> CatalogResult<news::Model> {
    news::Entity::find_by_id(id).one(conn).await?.ok_or_else(|| CatalogError::not_found("news", id))
}

async fn ensure_title_free<C: ConnectionTrait>(
    conn: &C,
    title: &str,
    except: Option<i32>,
) -> CatalogResult<()> {
    let mut query = news::Entity::find().filter(news::Column::Title.eq(title));
    if let Some(id) = except {
        query = query.filter(news::Column::Id.ne(id));
    }
    if query.one(conn).await?.is_some() {
        return Err(CatalogError::Validation(format!("a news item titled '{title}' already exists")));
    }
    Ok(())
}

async fn insert_related<C: ConnectionTrait>(
    conn: &C,
    news_id: i32,
    movie_id: i32,
) -> CatalogResult<bool> {
    find_movie(conn, movie_id).await?;
    if news_movie::Entity::find_by_id((news_id, movie_id)).one(conn).await?.is_some() {
        return Ok(false);
    }
    news_movie::Entity::insert(news_movie::ActiveModel {
        news_id: Set(news_id),
        movie_id: Set(movie_id),
    })
    .exec_without_returning(conn)
    .await?;
    Ok(true)
}

async fn replace_related<C: ConnectionTrait>(
    conn: &C,
    news_id: i32,
    movie_ids: &[i32],
) -> CatalogResult<()> {
    news_movie::Entity::delete_many().filter(news_movie::Column::NewsId.eq(news_id)).exec(conn).await?;
    for &movie_id in movie_ids {
        insert_related(conn, news_id, movie_id).await?;
    }
    Ok(())
}

async fn load<C: ConnectionTrait>(conn: &C, row: news::Model) -> CatalogResult<NewsItem> {
    let id = row.id;
    load_many(conn, vec![row])
        .await?
        .pop()
        .ok_or_else(|| CatalogError::not_found("news", id))
}

/// Attaches related movie ids to a batch of rows with a single query.
async fn load_many<C: ConnectionTrait>(
    conn: &C,
    rows: Vec<news::Model>,
) -> CatalogResult<Vec<NewsItem>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
    let mut related: BTreeMap<i32, BTreeSet<i32>> = BTreeMap::new();
    for link in news_movie::Entity::find()
        .filter(news_movie::Column::NewsId.is_in(ids))
        .all(conn)
        .await?
    {
        related.entry(link.news_id).or_default().insert(link.movie_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| NewsItem {
            related_movies: related.remove(&row.id).unwrap_or_default().into_iter().collect(),
            id: row.id,
            title: row.title,
            body: row.body,
            hidden: row.hidden,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
        .collect())
}
