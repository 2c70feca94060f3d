//! Local read model of carts, fed by cart events.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::json;
use shared_bus::{CartSnapshot, CommerceEvent, HandlerError, HandlerResult, Message, MessageHandler};
use std::collections::HashMap;
use tracing::{debug, info};

/// Carts keyed by cart id.
///
/// Updates carry a per-cart version and apply only on top of the version
/// right before them. An update that is already applied is acknowledged
/// without change. An update that arrives before its predecessor is a
/// transient failure, so the retry pipeline redelivers it once the gap has
/// been filled.
#[derive(Default)]
pub struct CartProjection {
    carts: RwLock<HashMap<String, CartSnapshot>>,
}

impl CartProjection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cart_id: &str) -> Option<CartSnapshot> {
        self.carts.read().get(cart_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.carts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.carts.read().is_empty()
    }

    fn apply_update(&self, cart: &CartSnapshot) -> HandlerResult {
        let mut carts = self.carts.write();
        let Some(current) = carts.get_mut(&cart.cart_id) else {
            return Err(HandlerError::transient(format!(
                "cart {} not created yet",
                cart.cart_id
            )));
        };

        if cart.version <= current.version {
            debug!(cart_id = %cart.cart_id, version = cart.version, current = current.version, "Stale cart update");
            return Ok(json!({"cart_id": cart.cart_id, "applied": false}));
        }
        if cart.version != current.version + 1 {
            return Err(HandlerError::transient(format!(
                "cart {} at version {}, got {}",
                cart.cart_id, current.version, cart.version
            )));
        }

        *current = cart.clone();
        Ok(json!({"cart_id": cart.cart_id, "applied": true, "version": cart.version}))
    }
}

#[async_trait]
impl MessageHandler<CommerceEvent> for CartProjection {
    async fn handle(&self, message: &Message<CommerceEvent>) -> HandlerResult {
        match &message.event {
            CommerceEvent::CartCreated(cart) => {
                let mut carts = self.carts.write();
                let created = !carts.contains_key(&cart.cart_id);
                if created {
                    carts.insert(cart.cart_id.clone(), cart.clone());
                    info!(cart_id = %cart.cart_id, user_id = %cart.user_id, "Cart created");
                }
                Ok(json!({"cart_id": cart.cart_id, "applied": created}))
            }
            CommerceEvent::CartUpdated(cart) => self.apply_update(cart),
            CommerceEvent::CartDeleted { cart_id, .. } => {
                let removed = self.carts.write().remove(cart_id).is_some();
                info!(%cart_id, removed, "Cart deleted");
                Ok(json!({"cart_id": cart_id, "applied": removed}))
            }
            _ => Ok(json!({"skipped": true})),
        }
    }
}
