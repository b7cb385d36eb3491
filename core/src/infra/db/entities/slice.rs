use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "slices")]
pub struct Model {
	/// Virtual network identifier
	#[sea_orm(primary_key, auto_increment = false)]
	pub id: i64,

	pub state: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::port::Entity")]
	Ports,
}

impl Related<super::port::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::Ports.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
