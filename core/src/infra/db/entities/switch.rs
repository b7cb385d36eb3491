use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "switches")]
pub struct Model {
	#[sea_orm(primary_key, auto_increment = false)]
	pub datapath_id: i64,

	pub controller_host: String,

	pub controller_pid: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
	#[sea_orm(has_many = "super::switch_port::Entity")]
	SwitchPorts,
}

impl Related<super::switch_port::Entity> for Entity {
	fn to() -> RelationDef {
		Relation::SwitchPorts.def()
	}
}

impl ActiveModelBehavior for ActiveModel {}
