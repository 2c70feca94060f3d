use async_trait::async_trait;
use serde_json::json;
use shared_bus::{CommerceEvent, HandlerError, HandlerResult, Message, MessageHandler};
use std::sync::Arc;
use tracing::{debug, info};

use super::cache::CacheAside;
use crate::domain::{entity_key, PRODUCT_NAMESPACE, PRODUCT_SEARCH_NAMESPACE};

/// Drops cached product reads when a product changes anywhere.
///
/// Deletes `product:<id>` and every `product_search:*` entry. A store
/// failure is transient so the event goes through the retry pipeline
/// instead of leaving stale entries until their TTL.
pub struct ProductCacheInvalidator {
    cache: Arc<CacheAside>,
}

impl ProductCacheInvalidator {
    pub fn new(cache: Arc<CacheAside>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl MessageHandler<CommerceEvent> for ProductCacheInvalidator {
    async fn handle(&self, message: &Message<CommerceEvent>) -> HandlerResult {
        let product_id = match &message.event {
            CommerceEvent::ProductCreated(p) | CommerceEvent::ProductUpdated(p) => p.id.as_str(),
            CommerceEvent::ProductDeleted { product_id }
            | CommerceEvent::ProductQuantityUpdated { product_id, .. } => product_id.as_str(),
            _ => {
                debug!(routing_key = %message.routing_key, "Not a product event, skipping");
                return Ok(json!({"skipped": true}));
            }
        };

        let entity = self
            .cache
            .invalidate(&[entity_key(PRODUCT_NAMESPACE, product_id)])
            .await
            .map_err(HandlerError::transient)?;
        let searches = self
            .cache
            .invalidate_namespace(PRODUCT_SEARCH_NAMESPACE)
            .await
            .map_err(HandlerError::transient)?;

        info!(product_id, entity, searches, "Product cache invalidated");
        Ok(json!({"product_id": product_id, "invalidated": entity + searches}))
    }
}
