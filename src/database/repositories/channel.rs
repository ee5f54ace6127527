//! SeaORM-based provider channel repository

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::{Set, Unchanged},
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use uuid::Uuid;

use crate::entities::{channels, prelude::Channels};
use crate::errors::IngestResult;
use crate::models::StoredChannel;

use super::traits::ChannelStore;

#[derive(Clone)]
pub struct ChannelSeaOrmRepository {
    connection: Arc<DatabaseConnection>,
}

impl ChannelSeaOrmRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn model_to_domain(model: channels::Model) -> StoredChannel {
        StoredChannel {
            id: model.id,
            source_id: model.source_id,
            stream_id: model.stream_id,
            name: model.name,
            stream_url: model.stream_url,
            category_id: model.category_id,
            logo_url: model.logo_url,
            epg_channel_id: model.epg_channel_id,
            auto_epg_channel_id: model.auto_epg_channel_id,
            custom_epg_channel_id: model.custom_epg_channel_id,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }

    fn domain_to_active(row: &StoredChannel) -> channels::ActiveModel {
        channels::ActiveModel {
            id: Set(row.id),
            source_id: Set(row.source_id),
            stream_id: Set(row.stream_id.clone()),
            name: Set(row.name.clone()),
            stream_url: Set(row.stream_url.clone()),
            category_id: Set(row.category_id.clone()),
            logo_url: Set(row.logo_url.clone()),
            epg_channel_id: Set(row.epg_channel_id.clone()),
            auto_epg_channel_id: Set(row.auto_epg_channel_id.clone()),
            custom_epg_channel_id: Set(row.custom_epg_channel_id.clone()),
            created_at: Set(row.created_at),
            updated_at: Set(row.updated_at),
        }
    }
}

#[async_trait]
impl ChannelStore for ChannelSeaOrmRepository {
    async fn find_by_source(&self, source_id: Uuid) -> IngestResult<Vec<StoredChannel>> {
        let models = Channels::find()
            .filter(channels::Column::SourceId.eq(source_id))
            .order_by_asc(channels::Column::StreamId)
            .all(&*self.connection)
            .await?;
        Ok(models.into_iter().map(Self::model_to_domain).collect())
    }

    async fn upsert_batch(&self, rows: &[StoredChannel]) -> IngestResult<()> {
        if rows.is_empty() {
            return Ok(());
        }

        // Conditional write on the stable-key unique index. Row id and
        // created_at stay with the existing row on conflict.
        Channels::insert_many(rows.iter().map(Self::domain_to_active))
            .on_conflict(
                OnConflict::columns([channels::Column::SourceId, channels::Column::StreamId])
                    .update_columns([
                        channels::Column::Name,
                        channels::Column::StreamUrl,
                        channels::Column::CategoryId,
                        channels::Column::LogoUrl,
                        channels::Column::EpgChannelId,
                        channels::Column::AutoEpgChannelId,
                        channels::Column::CustomEpgChannelId,
                        channels::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&*self.connection)
            .await?;
        Ok(())
    }

    async fn delete_by_keys(&self, source_id: Uuid, stream_ids: &[String]) -> IngestResult<u64> {
        if stream_ids.is_empty() {
            return Ok(0);
        }
        let result = Channels::delete_many()
            .filter(channels::Column::SourceId.eq(source_id))
            .filter(channels::Column::StreamId.is_in(stream_ids.iter().cloned()))
            .exec(&*self.connection)
            .await?;
        Ok(result.rows_affected)
    }

    async fn set_auto_epg_batch(
        &self,
        updates: &[(Uuid, Option<String>)],
    ) -> IngestResult<()> {
        for (id, auto_epg_channel_id) in updates {
            let active = channels::ActiveModel {
                id: Unchanged(*id),
                auto_epg_channel_id: Set(auto_epg_channel_id.clone()),
                updated_at: Set(Utc::now()),
                ..Default::default()
            };
            Channels::update(active).exec(&*self.connection).await?;
        }
        Ok(())
    }
}
