use thiserror::Error;

use crate::{
    db_types::{AuditChain, OrderId, OrderStatusType, WebhookProvider},
    pricing::PricingError,
    traits::StoreError,
};

#[derive(Debug, Clone, Error)]
pub enum OrderFlowError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("Pricing error. {0}")]
    Pricing(#[from] PricingError),
    #[error("{0}")]
    Audit(#[from] AuditError),
    #[error("Order {0} does not exist")]
    OrderNotFound(String),
    #[error("Cannot apply {transition} to order {order_id}, which is {from}")]
    InvalidTransition { order_id: OrderId, from: OrderStatusType, transition: String },
    #[error("Promo code {code} cannot be used. {reason}")]
    InvalidPromoCode { code: String, reason: String },
    #[error("Invalid checkout request. {0}")]
    InvalidCheckout(String),
    #[error("Cannot link provider reference to order {order_id}. {reason}")]
    ProviderReferenceRejected { order_id: OrderId, reason: String },
    #[error("Could not assign a unique reference code after {0} attempts")]
    ReferenceCodeExhausted(usize),
}

impl OrderFlowError {
    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

#[derive(Debug, Clone, Error)]
pub enum WebhookError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    OrderFlow(#[from] OrderFlowError),
    #[error("No {provider} order is linked to provider reference {reference}")]
    UnknownReference { provider: WebhookProvider, reference: String },
    #[error("Could not parse the {provider} notification. {reason}")]
    InvalidPayload { provider: WebhookProvider, reason: String },
}

#[derive(Debug, Clone, Error)]
pub enum AuditError {
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("The audit chain secret is not usable. {0}")]
    InvalidSecret(String),
    #[error("The {chain} audit chain is broken at index {index} (entry #{entry_id}). {reason}")]
    ChainMismatch { chain: AuditChain, index: usize, entry_id: i64, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LeaderError {
    #[error("The leader lock name {0} has already been registered")]
    DuplicateLockName(String),
    #[error("The leader lock name {0} hashes to the same lock id as another registered name")]
    LockIdCollision(String),
}
