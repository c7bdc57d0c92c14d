//! The order lifecycle as a closed transition table.
//!
//! Nothing in here touches storage. [`decide`] looks at the order's current status and a trigger and says what should
//! happen; [`crate::spe_api::OrderFlowApi`] carries the decision out under the order's row lock.
use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::db_types::OrderStatusType;

/// Written to `cancel_reason` when the expiry sweep cancels an unpaid order.
pub const PAYMENT_TIMEOUT_REASON: &str = "payment_timeout";

/// Everything that can ask an order to change state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum OrderTransition {
    /// The provider captured the payment.
    PaymentConfirmed,
    /// The provider reported a failed payment attempt. The customer may still retry.
    PaymentFailed { reason: String },
    /// The order sat in `pending_payment` for longer than the payment TTL.
    Expire,
    /// The merchant accepted the order.
    Accept,
    Ship,
    Deliver,
    Cancel { reason: String },
    Refund,
    /// Administrative override. Still bound by the transition table.
    Manual { to: OrderStatusType, reason: Option<String> },
}

impl OrderTransition {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PaymentConfirmed => "payment_confirmed",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::Expire => "expire",
            Self::Accept => "accept",
            Self::Ship => "ship",
            Self::Deliver => "deliver",
            Self::Cancel { .. } => "cancel",
            Self::Refund => "refund",
            Self::Manual { .. } => "manual",
        }
    }

    /// The reason stored on the order if this transition cancels it.
    pub fn cancel_reason(&self) -> Option<&str> {
        match self {
            Self::Expire => Some(PAYMENT_TIMEOUT_REASON),
            Self::Cancel { reason } => Some(reason.as_str()),
            Self::Manual { reason, .. } => reason.as_deref(),
            _ => None,
        }
    }

    fn target(&self) -> Option<OrderStatusType> {
        match self {
            Self::Accept => Some(OrderStatusType::Paid),
            Self::Ship => Some(OrderStatusType::Shipped),
            Self::Deliver => Some(OrderStatusType::Delivered),
            Self::Cancel { .. } => Some(OrderStatusType::Cancelled),
            Self::Refund => Some(OrderStatusType::Refunded),
            Self::Manual { to, .. } => Some(*to),
            Self::PaymentConfirmed | Self::PaymentFailed { .. } | Self::Expire => None,
        }
    }
}

impl Display for OrderTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual { to, .. } => write!(f, "manual({to})"),
            other => f.write_str(other.name()),
        }
    }
}

/// The outcome of applying a trigger to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionDecision {
    Move(OrderStatusType),
    /// No status change, but the trigger is recorded (a failed payment bumps the retry counter).
    Record,
    /// The trigger has already taken effect.
    NoOp,
    InvalidTransition,
}

/// The edges of the order lifecycle. Anything not listed here is rejected.
pub fn is_allowed(from: OrderStatusType, to: OrderStatusType) -> bool {
    use OrderStatusType::*;
    matches!(
        (from, to),
        (PendingPayment, PendingAcceptance) |
            (PendingPayment, Cancelled) |
            (PendingAcceptance, Paid) |
            (PendingAcceptance, Cancelled) |
            (PendingAcceptance, Refunded) |
            (Paid, Shipped) |
            (Paid, Cancelled) |
            (Paid, Refunded) |
            (Shipped, Delivered) |
            (Shipped, Refunded) |
            (Delivered, Refunded)
    )
}

pub fn decide(current: OrderStatusType, transition: &OrderTransition) -> TransitionDecision {
    use OrderStatusType::*;
    match transition {
        OrderTransition::PaymentConfirmed => match current {
            PendingPayment => TransitionDecision::Move(PendingAcceptance),
            // A late confirmation for an expired order must not resurrect it
            Cancelled => TransitionDecision::InvalidTransition,
            _ => TransitionDecision::NoOp,
        },
        OrderTransition::PaymentFailed { .. } => match current {
            PendingPayment => TransitionDecision::Record,
            _ => TransitionDecision::NoOp,
        },
        OrderTransition::Expire => match current {
            PendingPayment => TransitionDecision::Move(Cancelled),
            _ => TransitionDecision::NoOp,
        },
        // Only a payment confirmation may enter pending_acceptance
        OrderTransition::Manual { to: PendingAcceptance, .. } if current != PendingAcceptance => {
            TransitionDecision::InvalidTransition
        },
        targeted => match targeted.target() {
            Some(to) if to == current => TransitionDecision::NoOp,
            Some(to) if is_allowed(current, to) => TransitionDecision::Move(to),
            _ => TransitionDecision::InvalidTransition,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db_types::OrderStatusType::*;

    const ALL: [OrderStatusType; 7] =
        [PendingPayment, PendingAcceptance, Paid, Shipped, Delivered, Cancelled, Refunded];

    #[test]
    fn terminal_states_have_no_exits() {
        for to in ALL {
            assert!(!is_allowed(Cancelled, to));
            assert!(!is_allowed(Refunded, to));
        }
    }

    #[test]
    fn nothing_moves_backwards() {
        assert!(!is_allowed(Paid, PendingPayment));
        assert!(!is_allowed(PendingAcceptance, PendingPayment));
        assert!(!is_allowed(Delivered, Shipped));
        assert!(!is_allowed(Shipped, Cancelled));
        for s in ALL {
            assert!(!is_allowed(s, s));
        }
    }

    #[test]
    fn payment_confirmation_is_idempotent() {
        assert_eq!(decide(PendingPayment, &OrderTransition::PaymentConfirmed), TransitionDecision::Move(PendingAcceptance));
        for s in [PendingAcceptance, Paid, Shipped, Delivered, Refunded] {
            assert_eq!(decide(s, &OrderTransition::PaymentConfirmed), TransitionDecision::NoOp, "{s}");
        }
        assert_eq!(decide(Cancelled, &OrderTransition::PaymentConfirmed), TransitionDecision::InvalidTransition);
    }

    #[test]
    fn failed_payments_are_recorded_while_pending() {
        let failed = OrderTransition::PaymentFailed { reason: "card_declined".into() };
        assert_eq!(decide(PendingPayment, &failed), TransitionDecision::Record);
        assert_eq!(decide(Paid, &failed), TransitionDecision::NoOp);
    }

    #[test]
    fn expiry_only_touches_pending_payment() {
        assert_eq!(decide(PendingPayment, &OrderTransition::Expire), TransitionDecision::Move(Cancelled));
        for s in [PendingAcceptance, Paid, Cancelled, Refunded] {
            assert_eq!(decide(s, &OrderTransition::Expire), TransitionDecision::NoOp);
        }
        assert_eq!(OrderTransition::Expire.cancel_reason(), Some(PAYMENT_TIMEOUT_REASON));
    }

    #[test]
    fn fulfilment_path() {
        assert_eq!(decide(PendingAcceptance, &OrderTransition::Accept), TransitionDecision::Move(Paid));
        assert_eq!(decide(Paid, &OrderTransition::Ship), TransitionDecision::Move(Shipped));
        assert_eq!(decide(Shipped, &OrderTransition::Deliver), TransitionDecision::Move(Delivered));
        assert_eq!(decide(Delivered, &OrderTransition::Refund), TransitionDecision::Move(Refunded));
        assert_eq!(decide(PendingPayment, &OrderTransition::Ship), TransitionDecision::InvalidTransition);
        assert_eq!(decide(PendingPayment, &OrderTransition::Accept), TransitionDecision::InvalidTransition);
    }

    #[test]
    fn repeats_of_terminal_triggers_are_no_ops() {
        assert_eq!(decide(Refunded, &OrderTransition::Refund), TransitionDecision::NoOp);
        let cancel = OrderTransition::Cancel { reason: "customer".into() };
        assert_eq!(decide(Cancelled, &cancel), TransitionDecision::NoOp);
        assert_eq!(decide(Refunded, &cancel), TransitionDecision::InvalidTransition);
        assert_eq!(decide(Cancelled, &OrderTransition::Refund), TransitionDecision::InvalidTransition);
    }

    #[test]
    fn manual_moves_follow_the_table() {
        let back = OrderTransition::Manual { to: PendingPayment, reason: None };
        assert_eq!(decide(Paid, &back), TransitionDecision::InvalidTransition);
        let skip = OrderTransition::Manual { to: PendingAcceptance, reason: None };
        assert_eq!(decide(PendingPayment, &skip), TransitionDecision::InvalidTransition);
        assert_eq!(decide(PendingAcceptance, &skip), TransitionDecision::NoOp);
        let ship = OrderTransition::Manual { to: Shipped, reason: Some("courier pickup".into()) };
        assert_eq!(decide(Paid, &ship), TransitionDecision::Move(Shipped));
        assert_eq!(ship.to_string(), "manual(shipped)");
    }
}
