use sea_orm::entity::prelude::*;

use crate::models::Director;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "movie")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub display_name: String,
    #[sea_orm(unique)]
    pub internal_name: String,
    #[sea_orm(column_type = "Json")]
    pub director: Director,
    #[sea_orm(column_type = "Text", nullable)]
    pub synopsis: Option<String>,
    #[sea_orm(column_type = "Json", nullable)]
    pub detail: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub cast_info: Option<Json>,
    pub poster: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
