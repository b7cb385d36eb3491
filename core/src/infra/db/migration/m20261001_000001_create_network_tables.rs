//! Slices, their ports and MAC addresses, plus the switch registry and overlay directory.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
	async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.create_table(
				Table::create()
					.table(Slices::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Slices::Id)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Slices::State).integer().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Ports::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Ports::Id)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Ports::DatapathId).big_integer().not_null())
					.col(ColumnDef::new(Ports::SliceId).big_integer().not_null())
					.col(ColumnDef::new(Ports::PortNo).integer().not_null())
					.col(ColumnDef::new(Ports::PortName).text())
					.col(
						ColumnDef::new(Ports::Vid)
							.integer()
							.not_null()
							.default(0),
					)
					.col(ColumnDef::new(Ports::Type).integer().not_null())
					.col(ColumnDef::new(Ports::State).integer().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_ports_slice_datapath_state")
					.table(Ports::Table)
					.col(Ports::SliceId)
					.col(Ports::DatapathId)
					.col(Ports::State)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(MacAddresses::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(MacAddresses::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(MacAddresses::SliceId).big_integer().not_null())
					.col(ColumnDef::new(MacAddresses::PortId).big_integer().not_null())
					.col(ColumnDef::new(MacAddresses::Mac).big_integer().not_null())
					.col(ColumnDef::new(MacAddresses::State).integer().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_index(
				Index::create()
					.name("idx_mac_addresses_slice_port_state")
					.table(MacAddresses::Table)
					.col(MacAddresses::SliceId)
					.col(MacAddresses::PortId)
					.col(MacAddresses::State)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Switches::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Switches::DatapathId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Switches::ControllerHost).text().not_null())
					.col(ColumnDef::new(Switches::ControllerPid).big_integer().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(SwitchPorts::Table)
					.if_not_exists()
					.col(ColumnDef::new(SwitchPorts::DatapathId).big_integer().not_null())
					.col(ColumnDef::new(SwitchPorts::PortNo).integer().not_null())
					.col(ColumnDef::new(SwitchPorts::Name).text().not_null())
					.primary_key(
						Index::create()
							.col(SwitchPorts::DatapathId)
							.col(SwitchPorts::PortNo),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(OverlayNetworks::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(OverlayNetworks::SliceId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(
						ColumnDef::new(OverlayNetworks::ReflectorGroupId)
							.big_integer()
							.not_null(),
					)
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Reflectors::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Reflectors::Id)
							.integer()
							.not_null()
							.auto_increment()
							.primary_key(),
					)
					.col(ColumnDef::new(Reflectors::GroupId).big_integer().not_null())
					.col(ColumnDef::new(Reflectors::Uri).text().not_null())
					.col(ColumnDef::new(Reflectors::BroadcastAddress).text().not_null())
					.col(ColumnDef::new(Reflectors::BroadcastPort).integer().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(TunnelEndpoints::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(TunnelEndpoints::DatapathId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(TunnelEndpoints::LocalAddress).text().not_null())
					.col(ColumnDef::new(TunnelEndpoints::LocalPort).integer().not_null())
					.to_owned(),
			)
			.await?;

		manager
			.create_table(
				Table::create()
					.table(Agents::Table)
					.if_not_exists()
					.col(
						ColumnDef::new(Agents::DatapathId)
							.big_integer()
							.not_null()
							.primary_key(),
					)
					.col(ColumnDef::new(Agents::Uri).text().not_null())
					.to_owned(),
			)
			.await?;

		Ok(())
	}

	async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
		manager
			.drop_table(Table::drop().table(Agents::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(TunnelEndpoints::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Reflectors::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(OverlayNetworks::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(SwitchPorts::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Switches::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(MacAddresses::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Ports::Table).to_owned())
			.await?;
		manager
			.drop_table(Table::drop().table(Slices::Table).to_owned())
			.await?;

		Ok(())
	}
}

#[derive(DeriveIden)]
enum Slices {
	Table,
	Id,
	State,
}

#[derive(DeriveIden)]
enum Ports {
	Table,
	Id,
	DatapathId,
	SliceId,
	PortNo,
	PortName,
	Vid,
	Type,
	State,
}

#[derive(DeriveIden)]
enum MacAddresses {
	Table,
	Id,
	SliceId,
	PortId,
	Mac,
	State,
}

#[derive(DeriveIden)]
enum Switches {
	Table,
	DatapathId,
	ControllerHost,
	ControllerPid,
}

#[derive(DeriveIden)]
enum SwitchPorts {
	Table,
	DatapathId,
	PortNo,
	Name,
}

#[derive(DeriveIden)]
enum OverlayNetworks {
	Table,
	SliceId,
	ReflectorGroupId,
}

#[derive(DeriveIden)]
enum Reflectors {
	Table,
	Id,
	GroupId,
	Uri,
	BroadcastAddress,
	BroadcastPort,
}

#[derive(DeriveIden)]
enum TunnelEndpoints {
	Table,
	DatapathId,
	LocalAddress,
	LocalPort,
}

#[derive(DeriveIden)]
enum Agents {
	Table,
	DatapathId,
	Uri,
}
