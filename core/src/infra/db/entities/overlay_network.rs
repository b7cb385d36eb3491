use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "overlay_networks")]
pub struct Model {
	/// Slice carried by the overlay network, which is also its VNI
	#[sea_orm(primary_key, auto_increment = false)]
	pub slice_id: i64,

	pub reflector_group_id: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
