use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::event::Event;
use crate::store::StoreEvent;
use crate::types::{GlobalOrder, SequenceNumber};

/// Event representation on the event store, with the payload still serialized.
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone)]
pub(crate) struct DbEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub sequence_number: SequenceNumber,
    pub global_order: GlobalOrder,
    pub event_type: String,
    pub payload: Value,
    pub occurred_on: DateTime<Utc>,
}

impl DbEvent {
    pub fn try_into_store_event<E: Event>(self) -> Result<StoreEvent<E>, serde_json::Error> {
        Ok(StoreEvent {
            id: self.id,
            aggregate_id: self.aggregate_id,
            payload: serde_json::from_value::<E>(self.payload)?,
            occurred_on: self.occurred_on,
            sequence_number: self.sequence_number,
            global_order: self.global_order,
            event_type: self.event_type,
        })
    }
}
