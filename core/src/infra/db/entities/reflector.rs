use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "reflectors")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	pub group_id: i64,

	pub uri: String,

	pub broadcast_address: String,

	pub broadcast_port: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
