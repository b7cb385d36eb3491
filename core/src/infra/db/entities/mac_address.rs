use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "mac_addresses")]
pub struct Model {
	#[sea_orm(primary_key)]
	pub id: i32,

	pub slice_id: i64,

	pub port_id: i64,

	/// 48 bits address stored as an integer
	pub mac: i64,

	pub state: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
