use std::fmt::Display;

use serde::{Deserialize, Serialize};
use shop_payment_engine::{TransitionOutcome, WebhookOutcome};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

/// What the provider is told about a delivery it does not need to repeat.
impl From<&WebhookOutcome> for JsonResponse {
    fn from(outcome: &WebhookOutcome) -> Self {
        match outcome {
            WebhookOutcome::Applied(TransitionOutcome::Moved { order, from }) => {
                Self::success(format!("Order {} moved from {from} to {}", order.reference_code, order.status))
            },
            WebhookOutcome::Applied(TransitionOutcome::Recorded { order }) => {
                Self::success(format!("Recorded against order {}", order.reference_code))
            },
            WebhookOutcome::Applied(TransitionOutcome::Unchanged { order }) => {
                Self::success(format!("Order {} is already {}", order.reference_code, order.status))
            },
            WebhookOutcome::Duplicate => Self::success("Already processed"),
            WebhookOutcome::Ignored => Self::success("Event acknowledged"),
            // Still a 200. Repeating the delivery would not change the outcome.
            WebhookOutcome::Rejected(reason) => Self::failure(reason),
        }
    }
}
