use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_sync_jobs_table(manager).await?;
        self.create_channels_table(manager).await?;
        self.create_epg_channels_table(manager).await?;
        self.create_indexes(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EpgChannels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Channels::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    /// Uuid columns are native on PostgreSQL, text elsewhere
    fn uuid_column(&self, manager: &SchemaManager, column: impl IntoIden) -> ColumnDef {
        let mut col = ColumnDef::new(column);
        match manager.get_database_backend() {
            sea_orm::DatabaseBackend::Postgres => col.uuid().not_null(),
            _ => col.string().not_null(),
        };
        col
    }

    async fn create_sync_jobs_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(self.uuid_column(manager, SyncJobs::Id).primary_key())
                    .col(self.uuid_column(manager, SyncJobs::OwnerId))
                    .col(self.uuid_column(manager, SyncJobs::TargetId))
                    .col(ColumnDef::new(SyncJobs::Kind).string().not_null())
                    .col(ColumnDef::new(SyncJobs::SourceUrl).text().not_null())
                    .col(ColumnDef::new(SyncJobs::Status).string().not_null())
                    .col(ColumnDef::new(SyncJobs::Progress).integer().not_null().default(0))
                    .col(ColumnDef::new(SyncJobs::TotalItems).big_integer().not_null().default(0))
                    .col(
                        ColumnDef::new(SyncJobs::ProcessedItems)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::Message).text().null())
                    .col(ColumnDef::new(SyncJobs::Error).text().null())
                    .col(ColumnDef::new(SyncJobs::Artifact).text().null())
                    .col(ColumnDef::new(SyncJobs::ArtifactPath).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::ClaimedUntil)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_channels_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Channels::Table)
                    .if_not_exists()
                    .col(self.uuid_column(manager, Channels::Id).primary_key())
                    .col(self.uuid_column(manager, Channels::SourceId))
                    .col(ColumnDef::new(Channels::StreamId).string().not_null())
                    .col(ColumnDef::new(Channels::Name).string().not_null())
                    .col(ColumnDef::new(Channels::StreamUrl).text().not_null())
                    .col(ColumnDef::new(Channels::CategoryId).string().null())
                    .col(ColumnDef::new(Channels::LogoUrl).text().null())
                    .col(ColumnDef::new(Channels::EpgChannelId).string().null())
                    .col(ColumnDef::new(Channels::AutoEpgChannelId).string().null())
                    .col(ColumnDef::new(Channels::CustomEpgChannelId).string().null())
                    .col(
                        ColumnDef::new(Channels::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Channels::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_epg_channels_table(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EpgChannels::Table)
                    .if_not_exists()
                    .col(self.uuid_column(manager, EpgChannels::Id).primary_key())
                    .col(self.uuid_column(manager, EpgChannels::SourceId))
                    .col(ColumnDef::new(EpgChannels::ChannelId).string().not_null())
                    .col(ColumnDef::new(EpgChannels::DisplayName).string().not_null())
                    .col(ColumnDef::new(EpgChannels::LogoUrl).text().null())
                    .col(ColumnDef::new(EpgChannels::CustomDisplayName).string().null())
                    .col(
                        ColumnDef::new(EpgChannels::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EpgChannels::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn create_indexes(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        // Stable-key uniqueness: the upsert target for reconciliation
        manager
            .create_index(
                Index::create()
                    .name("idx_channels_source_stream_id")
                    .table(Channels::Table)
                    .col(Channels::SourceId)
                    .col(Channels::StreamId)
                    .unique()
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_epg_channels_source_channel_id")
                    .table(EpgChannels::Table)
                    .col(EpgChannels::SourceId)
                    .col(EpgChannels::ChannelId)
                    .unique()
                    .to_owned(),
            )
            .await?;
        // Job exclusivity lookups and the stale sweep
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_owner_target_status")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::OwnerId)
                    .col(SyncJobs::TargetId)
                    .col(SyncJobs::Status)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_status_updated_at")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::Status)
                    .col(SyncJobs::UpdatedAt)
                    .to_owned(),
            )
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    OwnerId,
    TargetId,
    Kind,
    SourceUrl,
    Status,
    Progress,
    TotalItems,
    ProcessedItems,
    Message,
    Error,
    Artifact,
    ArtifactPath,
    ClaimedUntil,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Channels {
    Table,
    Id,
    SourceId,
    StreamId,
    Name,
    StreamUrl,
    CategoryId,
    LogoUrl,
    EpgChannelId,
    AutoEpgChannelId,
    CustomEpgChannelId,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum EpgChannels {
    Table,
    Id,
    SourceId,
    ChannelId,
    DisplayName,
    LogoUrl,
    CustomDisplayName,
    CreatedAt,
    UpdatedAt,
}
