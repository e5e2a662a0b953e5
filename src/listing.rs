use futures::{Stream, StreamExt, TryStreamExt, stream};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, Paginator, PaginatorTrait,
    QueryFilter, QueryOrder, Select, SelectModel,
    sea_query::{LikeExpr, Query, SelectStatement},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    catalog::{hydrate, with_tag_tables},
    entities::movie,
    error::{CatalogError, CatalogResult},
    models::{Movie, TagKind},
};

/// Optional criteria for listing movies. All present criteria must match.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MovieFilter {
    /// Substring of the display or internal name, ASCII case-insensitive.
    pub name: Option<String>,
    pub genre: Option<i32>,
    pub label: Option<i32>,
    pub attribute: Option<i32>,
}

impl MovieFilter {
    pub fn tag(&self, kind: TagKind) -> Option<i32> {
        match kind {
            TagKind::Label => self.label,
            TagKind::Genre => self.genre,
            TagKind::Attribute => self.attribute,
        }
    }

    fn condition(&self) -> Condition {
        let mut cond = Condition::all();

        if let Some(name) = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            let pattern = LikeExpr::new(format!("%{}%", escape_like_literal(name))).escape('\\');
            cond = cond.add(
                Condition::any()
                    .add(movie::Column::DisplayName.like(pattern.clone()))
                    .add(movie::Column::InternalName.like(pattern)),
            );
        }

        for kind in TagKind::ALL {
            if let Some(tag_id) = self.tag(kind) {
                cond = cond.add(movie::Column::Id.in_subquery(members_of(kind, tag_id)));
            }
        }

        cond
    }
}

/// User text is matched literally, so `%` and `_` must not act as wildcards.
fn escape_like_literal(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '%' => out.push_str("\\%"),
            '_' => out.push_str("\\_"),
            other => out.push(other),
        }
    }
    out
}

fn members_of(kind: TagKind, tag_id: i32) -> SelectStatement {
    with_tag_tables!(kind, |tag, link| {
        Query::select()
            .column(link::Column::MovieId)
            .from(link::Entity)
            .and_where(link::Column::TagId.eq(tag_id))
            .to_owned()
    })
}

type MoviePages<'db> = Paginator<'db, DatabaseConnection, SelectModel<movie::Model>>;

/// A lazy listing of movies. Nothing is read until the stream is polled, and
/// every call to [`MovieQuery::stream`] starts again from the first movie.
#[derive(Clone)]
pub struct MovieQuery {
    db: DatabaseConnection,
    filter: MovieFilter,
    page_size: u64,
}

impl MovieQuery {
    pub(crate) fn new(db: DatabaseConnection, filter: MovieFilter, page_size: u64) -> Self {
        Self { db, filter, page_size }
    }

    fn select(&self) -> Select<movie::Entity> {
        movie::Entity::find().filter(self.filter.condition()).order_by_asc(movie::Column::Id)
    }

    pub async fn count(&self) -> CatalogResult<u64> {
        Ok(self.select().count(&self.db).await?)
    }

    /// Pages of hydrated movies, ordered by id.
    pub fn pages(&self) -> impl Stream<Item = CatalogResult<Vec<Movie>>> + '_ {
        debug!(filter = ?self.filter, page_size = self.page_size, "listing movies");
        let pages = self.select().paginate(&self.db, self.page_size);
        stream::try_unfold(pages, move |pages| self.next_page(pages))
    }

    pub fn stream(&self) -> impl Stream<Item = CatalogResult<Movie>> + '_ {
        self.pages()
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, CatalogError>)))
            .try_flatten()
    }

    /// Collects at most `limit` movies.
    pub async fn take(&self, limit: usize) -> CatalogResult<Vec<Movie>> {
        self.stream().take(limit).try_collect().await
    }

    async fn next_page<'a>(
        &'a self,
        mut pages: MoviePages<'a>,
    ) -> CatalogResult<Option<(Vec<Movie>, MoviePages<'a>)>> {
        let Some(rows) = pages.fetch_and_next().await? else {
            return Ok(None);
        };
        let movies = hydrate(&self.db, rows).await?;
        Ok(Some((movies, pages)))
    }
}
