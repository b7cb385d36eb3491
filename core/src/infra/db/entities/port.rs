use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ports")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub id: i64,

	pub datapath_id: i64,

	pub slice_id: i64,

	/// `OFPP_NONE` until resolved from `port_name`
	pub port_no: i32,

	pub port_name: Option<String>,

	pub vid: i32,

	#[sea_orm(column_name = "type")]
	pub port_type: i32,

	pub state: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::slice::Entity",
		from = "Column::SliceId",
		to = "super::slice::Column::Id"
	)]
	Slice,
}

impl Related<super::slice::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Slice.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
