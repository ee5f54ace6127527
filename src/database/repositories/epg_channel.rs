//! SeaORM-based EPG channel repository

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entities::{epg_channels, prelude::EpgChannels};
use crate::errors::IngestResult;
use crate::models::StoredEpgChannel;

use super::traits::EpgChannelStore;

#[derive(Clone)]
pub struct EpgChannelSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl EpgChannelSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn model_to_domain(model: epg_channels::Model) -> StoredEpgChannel {
        StoredEpgChannel {
            id: model.id,
            source_id: model.source_id,
            channel_id: model.channel_id,
            display_name: model.display_name,
            logo_url: model.logo_url,
            custom_display_name: model.custom_display_name,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    fn domain_to_active(row: &StoredEpgChannel) -> epg_channels::ActiveModel {
        epg_channels::ActiveModel {
            id: Set(row.id),
            source_id: Set(row.source_id),
            channel_id: Set(row.channel_id.clone()),
            display_name: Set(row.display_name.clone()),
            logo_url: Set(row.logo_url.clone()),
            custom_display_name: Set(row.custom_display_name.clone()),
            created_at: Set(row.created_at),
            updated_at: Set(row.updated_at),
        }
    }
}

#[async_trait]
impl EpgChannelStore for EpgChannelSeaOrmRepository {
    async fn find_by_source(&self, source_id: Uuid) -> IngestResult<Vec<StoredEpgChannel>> {
        let models = EpgChannels::find()
            .filter(epg_channels::Column::SourceId.eq(source_id))
            .order_by_asc(epg_channels::Column::ChannelId)
            .all(&*self.connection)
            .await?;
        Ok(models.into_iter().map(Self::model_to_domain).collect())
    }

    async fn upsert_batch(&self, rows: &[StoredEpgChannel]) -> IngestResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        EpgChannels::insert_many(rows.iter().map(Self::domain_to_active))
            .on_conflict(
                OnConflict::columns([
                    epg_channels::Column::SourceId,
                    epg_channels::Column::ChannelId,
                ])
                .update_columns([
                    epg_channels::Column::DisplayName,
                    epg_channels::Column::LogoUrl,
                    epg_channels::Column::CustomDisplayName,
                    epg_channels::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec(&*self.connection)
            .await?;
        Ok(())
    }

    async fn delete_by_keys(&self, source_id: Uuid, channel_ids: &[String]) -> IngestResult<u64> {
        if channel_ids.is_empty() {
            return Ok(0);
        }
        let result = EpgChannels::delete_many()
            .filter(epg_channels::Column::SourceId.eq(source_id))
            .filter(epg_channels::Column::ChannelId.is_in(channel_ids.iter().cloned()))
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected)
    }
}
