use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{Order, OrderId, OrderStatusType, PaymentMethod},
    pricing::CartLine,
};

/// The shipping method picked at checkout and what it costs. Quoting the price is the shipping collaborator's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingSelection {
    pub method: String,
    pub amount: Decimal,
}

/// What checkout hands the engine to create an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutRequest {
    pub customer_id: String,
    pub currency: String,
    pub lines: Vec<CartLine>,
    pub shipping: Option<ShippingSelection>,
    pub promo_code: Option<String>,
    pub payment_method: PaymentMethod,
    /// The provider's checkout session or order id, when it is already known at creation time. It can also be linked
    /// later with `OrderFlowApi::link_provider_reference`.
    pub provider_reference: Option<String>,
}

impl CheckoutRequest {
    pub fn new(customer_id: &str, currency: &str, payment_method: PaymentMethod) -> Self {
        Self {
            customer_id: customer_id.to_string(),
            currency: currency.to_string(),
            lines: Vec::new(),
            shipping: None,
            promo_code: None,
            payment_method,
            provider_reference: None,
        }
    }

    pub fn with_line(mut self, line: CartLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn with_shipping(mut self, method: &str, amount: Decimal) -> Self {
        self.shipping = Some(ShippingSelection { method: method.to_string(), amount });
        self
    }

    pub fn with_promo_code(mut self, code: &str) -> Self {
        self.promo_code = Some(code.to_string());
        self
    }

    pub fn with_provider_reference(mut self, reference: &str) -> Self {
        self.provider_reference = Some(reference.to_string());
        self
    }
}

/// The result of a trigger that was accepted by the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order changed status. `order` is the updated order.
    Moved { order: Order, from: OrderStatusType },
    /// Bookkeeping only, e.g. a failed payment attempt was counted.
    Recorded { order: Order },
    /// The trigger had already taken effect. Nothing was written.
    Unchanged { order: Order },
}

impl TransitionOutcome {
    pub fn order(&self) -> &Order {
        match self {
            Self::Moved { order, .. } | Self::Recorded { order } | Self::Unchanged { order } => order,
        }
    }

    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }
}

/// The result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpiryResult {
    /// Orders that were cancelled with reason `payment_timeout`
    pub expired: Vec<OrderId>,
    /// Orders that had moved on by the time their row was locked
    pub skipped: Vec<OrderId>,
    /// Orders that could not be expired this time, with the reason. They are picked up again on the next sweep.
    pub failed: Vec<(OrderId, String)>,
}
