use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "switch_ports")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub datapath_id: i64,

	#[sea_orm(primary_key, auto_increment = false)]
	pub port_no: i32,

	pub name: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(
		belongs_to = "super::switch::Entity",
		from = "Column::DatapathId",
		to = "super::switch::Column::DatapathId"
	)]
	Switch,
}

impl Related<super::switch::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Switch.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
