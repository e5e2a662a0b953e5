use std::collections::BTreeMap;

use sea_orm::{FromJsonQueryResult, prelude::Json};
use serde::{Deserialize, Deserializer, Serialize};

pub const MOVIE_NAME_MAX: usize = 32;
pub const TAG_NAME_MAX: usize = 16;
pub const NEWS_TITLE_MAX: usize = 64;
pub const NEWS_BODY_MAX: usize = 5000;

/// Role → person mapping, e.g. `{"director": "Christopher Nolan"}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(transparent)]
pub struct Director(pub BTreeMap<String, String>);

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Director {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    #[serde(rename = "labels")]
    Label,
    #[serde(rename = "genres")]
    Genre,
    #[serde(rename = "attributes")]
    Attribute,
}

impl TagKind {
    pub const ALL: [TagKind; 3] = [TagKind::Label, TagKind::Genre, TagKind::Attribute];

    pub fn entity_name(self) -> &'static str {
        match self {
            TagKind::Label => "label",
            TagKind::Genre => "genre",
            TagKind::Attribute => "attribute",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Tag {
    pub id: i32,
    pub name: String,
    pub created_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Movie {
    pub id: i32,
    pub display_name: String,
    pub internal_name: String,
    pub director: Director,
    pub synopsis: Option<String>,
    pub detail: Option<Json>,
    pub cast: Option<Json>,
    pub poster: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub labels: Vec<Tag>,
    pub genres: Vec<Tag>,
    pub attributes: Vec<Tag>,
}

/// Input for a new movie. Missing names deserialize to empty strings and are
/// rejected by validation.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewMovie {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub internal_name: String,
    #[serde(default)]
    pub director: Director,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub detail: Option<Json>,
    #[serde(default)]
    pub cast: Option<Json>,
    #[serde(default)]
    pub poster: Option<String>,
    #[serde(default)]
    pub labels: Vec<i32>,
    #[serde(default)]
    pub genres: Vec<i32>,
    #[serde(default)]
    pub attributes: Vec<i32>,
}

impl NewMovie {
    pub fn new(display_name: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            internal_name: internal_name.into(),
            ..Default::default()
        }
    }

    pub fn tag_ids(&self, kind: TagKind) -> &[i32] {
        match kind {
            TagKind::Label => &self.labels,
            TagKind::Genre => &self.genres,
            TagKind::Attribute => &self.attributes,
        }
    }
}

/// Partial update. `None` leaves a field alone; for nullable fields
/// `Some(None)` clears it. Tag lists replace the whole set.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MoviePatch {
    pub display_name: Option<String>,
    pub internal_name: Option<String>,
    pub director: Option<Director>,
    #[serde(default, deserialize_with = "nullable")]
    pub synopsis: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub detail: Option<Option<Json>>,
    #[serde(default, deserialize_with = "nullable")]
    pub cast: Option<Option<Json>>,
    #[serde(default, deserialize_with = "nullable")]
    pub poster: Option<Option<String>>,
    pub labels: Option<Vec<i32>>,
    pub genres: Option<Vec<i32>>,
    pub attributes: Option<Vec<i32>>,
}

impl MoviePatch {
    pub fn tag_ids(&self, kind: TagKind) -> Option<&[i32]> {
        match kind {
            TagKind::Label => self.labels.as_deref(),
            TagKind::Genre => self.genres.as_deref(),
            TagKind::Attribute => self.attributes.as_deref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewsItem {
    pub id: i32,
    pub title: String,
    pub body: String,
    pub hidden: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub related_movies: Vec<i32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewNews {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub related_movies: Vec<i32>,
}

impl NewNews {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self { title: title.into(), body: body.into(), ..Default::default() }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct NewsPatch {
    pub title: Option<String>,
    pub body: Option<String>,
    pub hidden: Option<bool>,
    pub related_movies: Option<Vec<i32>>,
}

/// Keeps an explicit `null` distinct from an absent field.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_distinguishes_null_from_absent() {
        let patch: MoviePatch =
            serde_json::from_str(r#"{"synopsis": null, "display_name": "Heat"}"#).unwrap();
        assert_eq!(patch.synopsis, Some(None));
        assert_eq!(patch.detail, None);
        assert_eq!(patch.display_name.as_deref(), Some("Heat"));
    }

    #[test]
    fn director_is_a_flat_object() {
        let director: Director = [("director", "Christopher Nolan")].into_iter().collect();
        let json = serde_json::to_value(&director).unwrap();
        assert_eq!(json, serde_json::json!({"director": "Christopher Nolan"}));
    }

    #[test]
    fn tag_kind_uses_plural_path_names() {
        let kind: TagKind = serde_json::from_str(r#""genres""#).unwrap();
        assert_eq!(kind, TagKind::Genre);
        assert_eq!(kind.entity_name(), "genre");
    }
}
