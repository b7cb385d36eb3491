use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tunnel_endpoints")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub datapath_id: i64,

	pub local_address: String,

	pub local_port: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
