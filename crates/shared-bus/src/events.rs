//! # Commerce Events
//!
//! Defines the typed event schema that flows through the broker.
//!
//! A publisher or listener is parameterized by an `EventSchema`. The
//! platform's own schema is `CommerceEvent`, a tagged union with one variant
//! per event kind, each carrying its own payload shape. On the wire it is
//! `{"type": "<kind>", "data": {...}}`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A typed event that can travel through the broker.
pub trait EventSchema: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Routing key the event is published under by default.
    fn routing_key(&self) -> String;

    /// Short kind name used in logs and the `x-event-type` header.
    fn event_type(&self) -> &'static str;
}

/// Product data carried by product events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: String,
    pub title: String,
    pub price_cents: u64,
    pub quantity: i64,
    pub seller_id: String,
    #[serde(default)]
    pub image: Option<String>,
}

/// A single line of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub title: String,
    pub price_cents: u64,
    pub seller_id: String,
    pub quantity: u32,
}

/// Cart data carried by cart events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub cart_id: String,
    pub user_id: String,
    pub line: CartLine,
    pub total_cents: u64,
    /// Monotonic per-cart version, used by consumers to drop stale updates.
    pub version: u64,
}

/// All events published by the platform services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CommerceEvent {
    // =========================================================================
    // PRODUCT SERVICE
    // =========================================================================
    ProductCreated(ProductSnapshot),
    ProductUpdated(ProductSnapshot),
    ProductDeleted { product_id: String },
    ProductQuantityUpdated { product_id: String, quantity: i64 },

    // =========================================================================
    // CART SERVICE
    // =========================================================================
    CartCreated(CartSnapshot),
    CartUpdated(CartSnapshot),
    CartDeleted {
        cart_id: String,
        user_id: String,
        version: u64,
    },

    // =========================================================================
    // ORDER / PAYMENT
    // =========================================================================
    OrderCreated {
        order_id: String,
        user_id: String,
        cart_ids: Vec<String>,
        total_cents: u64,
    },
    PaymentCreated {
        payment_id: String,
        order_id: String,
        amount_cents: u64,
        currency: String,
    },
    PaymentFailed {
        payment_id: String,
        order_id: String,
        reason: String,
    },

    // =========================================================================
    // AUTH / NOTIFICATION
    // =========================================================================
    UserForgotPassword { email: String, reset_token: String },
    SellerCreated { seller_id: String, email: String },
}

impl CommerceEvent {
    /// Id of the product this event concerns, if any.
    #[must_use]
    pub fn product_id(&self) -> Option<&str> {
        match self {
            Self::ProductCreated(p) | Self::ProductUpdated(p) => Some(&p.id),
            Self::ProductDeleted { product_id }
            | Self::ProductQuantityUpdated { product_id, .. } => Some(product_id),
            Self::CartCreated(c) | Self::CartUpdated(c) => Some(&c.line.product_id),
            _ => None,
        }
    }
}

impl EventSchema for CommerceEvent {
    fn routing_key(&self) -> String {
        match self {
            Self::ProductCreated(_) => "product.created",
            Self::ProductUpdated(_) => "product.updated",
            Self::ProductDeleted { .. } => "product.deleted",
            Self::ProductQuantityUpdated { .. } => "product.quantity.updated",
            Self::CartCreated(_) => "cart.created",
            Self::CartUpdated(_) => "cart.updated",
            Self::CartDeleted { .. } => "cart.deleted",
            Self::OrderCreated { .. } => "order.created",
            Self::PaymentCreated { .. } => "payment.created",
            Self::PaymentFailed { .. } => "payment.error.failed",
            Self::UserForgotPassword { .. } => "user.password.forgot",
            Self::SellerCreated { .. } => "seller.created",
        }
        .to_string()
    }

    fn event_type(&self) -> &'static str {
        match self {
            Self::ProductCreated(_) => "product_created",
            Self::ProductUpdated(_) => "product_updated",
            Self::ProductDeleted { .. } => "product_deleted",
            Self::ProductQuantityUpdated { .. } => "product_quantity_updated",
            Self::CartCreated(_) => "cart_created",
            Self::CartUpdated(_) => "cart_updated",
            Self::CartDeleted { .. } => "cart_deleted",
            Self::OrderCreated { .. } => "order_created",
            Self::PaymentCreated { .. } => "payment_created",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::UserForgotPassword { .. } => "user_forgot_password",
            Self::SellerCreated { .. } => "seller_created",
        }
    }
}
