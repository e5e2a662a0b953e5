use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, NotSet, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use tracing::info;

use crate::{
    catalog::{Catalog, now_micros, required_text, with_tag_tables},
    error::{CatalogError, CatalogResult},
    models::{TAG_NAME_MAX, Tag, TagKind},
};

impl Catalog {
    pub async fn create_tag(&self, kind: TagKind, name: &str) -> CatalogResult<Tag> {
        let name = required_text("name", name, TAG_NAME_MAX)?;
        let txn = self.db().begin().await?;
        ensure_name_free(&txn, kind, &name, None).await?;

        let tag = with_tag_tables!(kind, |tag, link| {
            let m = tag::ActiveModel { id: NotSet, name: Set(name), created_at: Set(now_micros()) }
                .insert(&txn)
                .await?;
            Tag { id: m.id, name: m.name, created_at: m.created_at }
        });
        txn.commit().await?;

        info!(kind = kind.entity_name(), tag_id = tag.id, name = %tag.name, "tag created");
        Ok(tag)
    }

    pub async fn get_tag(&self, kind: TagKind, id: i32) -> CatalogResult<Tag> {
        find_tag(self.db(), kind, id).await
    }

    pub async fn list_tags(&self, kind: TagKind) -> CatalogResult<Vec<Tag>> {
        let tags: Vec<Tag> = with_tag_tables!(kind, |tag, link| {
            tag::Entity::find()
                .order_by_asc(tag::Column::Id)
                .all(self.db())
                .await?
                .into_iter()
                .map(|m| Tag { id: m.id, name: m.name, created_at: m.created_at })
                .collect()
        });
        Ok(tags)
    }

    /// Renaming is the only change a tag accepts; its creation time is fixed.
    pub async fn rename_tag(&self, kind: TagKind, id: i32, name: &str) -> CatalogResult<Tag> {
        let name = required_text("name", name, TAG_NAME_MAX)?;
        let txn = self.db().begin().await?;
        find_tag(&txn, kind, id).await?;
        ensure_name_free(&txn, kind, &name, Some(id)).await?;

        let tag = with_tag_tables!(kind, |tag, link| {
            let m = tag::ActiveModel { id: Set(id), name: Set(name), created_at: NotSet }
                .update(&txn)
                .await?;
            Tag { id: m.id, name: m.name, created_at: m.created_at }
        });
        txn.commit().await?;

        info!(kind = kind.entity_name(), tag_id = id, name = %tag.name, "tag renamed");
        Ok(tag)
    }

    /// Deletes the tag and its join rows; the movies it was attached to stay.
    pub async fn delete_tag(&self, kind: TagKind, id: i32) -> CatalogResult<()> {
        let txn = self.db().begin().await?;
        find_tag(&txn, kind, id).await?;

        let detached = with_tag_tables!(kind, |tag, link| {
            let detached = link::Entity::delete_many()
                .filter(link::Column::TagId.eq(id))
                .exec(&txn)
                .await?
                .rows_affected;
            tag::Entity::delete_by_id(id).exec(&txn).await?;
            detached
        });
        txn.commit().await?;

        info!(kind = kind.entity_name(), tag_id = id, detached, "tag deleted");
        Ok(())
    }
}

async fn find_tag<C: ConnectionTrait>(conn: &C, kind: TagKind, id: i32) -> CatalogResult<Tag> {
    let tag = with_tag_tables!(kind, |tag, link| {
        tag::Entity::find_by_id(id)
            .one(conn)
            .await?
            .map(|m| Tag { id: m.id, name: m.name, created_at: m.created_at })
    });
    tag.ok_or_else(|| CatalogError::not_found(kind.entity_name(), id))
}

async fn ensure_name_free<C: ConnectionTrait>(
    conn: &C,
    kind: TagKind,
    name: &str,
    except: Option<i32>,
) -> CatalogResult<()> {
    let taken = with_tag_tables!(kind, |tag, link| {
        let mut query = tag::Entity::find().filter(tag::Column::Name.eq(name));
        if let Some(id) = except {
            query = query.filter(tag::Column::Id.ne(id));
        }
        query.one(conn).await?.is_some()
    });
    if taken {
        return Err(CatalogError::Validation(format!(
            "a {} named '{name}' already exists",
            kind.entity_name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, models::NewMovie};

    async fn catalog() -> Catalog {
        Catalog::new(db::memory().await, 10)
    }

    #[tokio::test]
    async fn names_are_unique_per_kind() {
        let catalog = catalog().await;
        catalog.create_tag(TagKind::Label, "classic").await.unwrap();

        let err = catalog.create_tag(TagKind::Label, "classic").await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));

        catalog.create_tag(TagKind::Genre, "classic").await.unwrap();
        catalog.create_tag(TagKind::Attribute, "classic").await.unwrap();
        assert_eq!(catalog.list_tags(TagKind::Label).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn names_are_required_and_short() {
        let catalog = catalog().await;

        let err = catalog.create_tag(TagKind::Genre, "  ").await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        let err = catalog.create_tag(TagKind::Genre, "a-very-long-genre-name").await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        // Limit counts characters, not bytes.
        catalog.create_tag(TagKind::Genre, "科幻科幻科幻科幻科幻科幻科幻科幻").await.unwrap();
    }

    #[tokio::test]
    async fn rename_keeps_creation_time() {
        let catalog = catalog().await;
        let drama = catalog.create_tag(TagKind::Genre, "drama").await.unwrap();
        let comedy = catalog.create_tag(TagKind::Genre, "comedy").await.unwrap();

        let renamed = catalog.rename_tag(TagKind::Genre, drama.id, "melodrama").await.unwrap();
        assert_eq!(renamed.name, "melodrama");
        assert_eq!(renamed.created_at, drama.created_at);

        let err = catalog.rename_tag(TagKind::Genre, drama.id, &comedy.name).await.unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        let err = catalog.rename_tag(TagKind::Genre, 404, "noir").await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { entity: "genre", id: 404 }));

        // Renaming to its own name is not a collision.
        catalog.rename_tag(TagKind::Genre, drama.id, "melodrama").await.unwrap();
    }

    #[tokio::test]
    async fn deleting_attached_label_keeps_the_movie() {
        let catalog = catalog().await;
        let label = catalog.create_tag(TagKind::Label, "cult").await.unwrap();
        let movie = catalog
            .create_movie(NewMovie { labels: vec![label.id], ..NewMovie::new("Brazil", "brazil_1985") })
            .await
            .unwrap();
        assert_eq!(movie.labels.len(), 1);

        catalog.delete_tag(TagKind::Label, label.id).await.unwrap();

        let movie = catalog.get_movie(movie.id).await.unwrap();
        assert!(movie.labels.is_empty());
        let err = catalog.get_tag(TagKind::Label, label.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
        let err = catalog.delete_tag(TagKind::Label, label.id).await.unwrap_err();
        assert!(matches!(err, CatalogError::NotFound { .. }));
    }
}
