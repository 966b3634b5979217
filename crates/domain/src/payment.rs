//! Payment aggregate with its append-only attempt log.

use chrono::{DateTime, Utc};
use common::AggregateId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_objects::Money;

/// The status of a payment.
///
/// Status transitions:
/// ```text
/// Initiated ──► Authorized ──► Captured ──► Refunded
///     │              │
///     ├──────────────┼──► Failed
///     └──────────────┴──► Cancelled
/// ```
///
/// Capture requires a prior authorization; refund requires a prior capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaymentStatus {
    /// Payment created, no gateway call has succeeded yet.
    #[default]
    Initiated,

    /// Gateway authorized the amount.
    Authorized,

    /// Gateway captured the amount (terminal success).
    Captured,

    /// Gateway declined or a call ultimately failed (terminal).
    Failed,

    /// Captured amount was returned to the customer.
    Refunded,

    /// Payment abandoned before capture (terminal).
    Cancelled,
}

impl PaymentStatus {
    /// Returns true if the payment can be authorized in this status.
    pub fn can_authorize(&self) -> bool {
        matches!(self, PaymentStatus::Initiated)
    }

    /// Returns true if the payment can be captured in this status.
    pub fn can_capture(&self) -> bool {
        matches!(self, PaymentStatus::Authorized)
    }

    /// Returns true if the payment can fail in this status.
    pub fn can_fail(&self) -> bool {
        matches!(self, PaymentStatus::Initiated | PaymentStatus::Authorized)
    }

    /// Returns true if the payment can be refunded in this status.
    pub fn can_refund(&self) -> bool {
        matches!(self, PaymentStatus::Captured)
    }

    /// Returns true if the payment can be cancelled in this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, PaymentStatus::Initiated | PaymentStatus::Authorized)
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Refunded | PaymentStatus::Cancelled
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "Initiated",
            PaymentStatus::Authorized => "Authorized",
            PaymentStatus::Captured => "Captured",
            PaymentStatus::Failed => "Failed",
            PaymentStatus::Refunded => "Refunded",
            PaymentStatus::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the customer pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PaymentMethod {
    /// Credit or debit card.
    #[default]
    Card,
    /// Direct bank transfer.
    BankTransfer,
    /// Digital wallet.
    Wallet,
}

/// Errors that can occur during payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The payment is not in a status that admits the transition.
    #[error("Invalid state transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: PaymentStatus,
        action: &'static str,
    },

    /// Amount must be positive.
    #[error("Invalid amount: {amount_cents} cents (must be greater than 0)")]
    InvalidAmount { amount_cents: i64 },
}

/// One gateway call, as recorded in the attempt log.
///
/// The log is append-only and never rewritten, giving a full audit trail
/// of every PSP interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    /// Operation name ("authorize", "capture", "refund").
    pub operation: String,

    /// Whether the gateway call succeeded.
    pub success: bool,

    /// Gateway confirmation code on success, or decline reason on failure.
    pub detail: String,

    /// When the attempt happened.
    pub attempted_at: DateTime<Utc>,
}

/// Payment aggregate root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    id: AggregateId,
    order_id: AggregateId,
    amount: Money,
    currency: String,
    method: PaymentMethod,
    status: PaymentStatus,
    attempts: Vec<PaymentAttempt>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Payment {
    /// Initiates a payment for an order.
    pub fn initiate(
        order_id: AggregateId,
        amount: Money,
        currency: impl Into<String>,
        method: PaymentMethod,
    ) -> Result<Self, PaymentError> {
        if !amount.is_positive() {
            return Err(PaymentError::InvalidAmount {
                amount_cents: amount.cents(),
            });
        }

        let now = Utc::now();
        Ok(Self {
            id: AggregateId::new(),
            order_id,
            amount,
            currency: currency.into(),
            method,
            status: PaymentStatus::Initiated,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Returns the payment ID.
    pub fn id(&self) -> AggregateId {
        self.id
    }

    /// Returns the order this payment belongs to.
    pub fn order_id(&self) -> AggregateId {
        self.order_id
    }

    /// Returns the payment amount.
    pub fn amount(&self) -> Money {
        self.amount
    }

    /// Returns the currency code.
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Returns the payment method.
    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    /// Returns the current status.
    pub fn status(&self) -> PaymentStatus {
        self.status
    }

    /// Returns the attempt log, oldest first.
    pub fn attempts(&self) -> &[PaymentAttempt] {
        &self.attempts
    }

    fn record_attempt(&mut self, operation: &str, success: bool, detail: impl Into<String>) {
        self.attempts.push(PaymentAttempt {
            operation: operation.to_string(),
            success,
            detail: detail.into(),
            attempted_at: Utc::now(),
        });
        self.updated_at = Utc::now();
    }

    /// Records a successful authorization.
    pub fn authorize(&mut self, confirmation_code: impl Into<String>) -> Result<(), PaymentError> {
        if !self.status.can_authorize() {
            return Err(PaymentError::InvalidStateTransition {
                current_status: self.status,
                action: "authorize",
            });
        }
        self.record_attempt("authorize", true, confirmation_code);
        self.status = PaymentStatus::Authorized;
        Ok(())
    }

    /// Records a successful capture. Requires a prior authorization.
    pub fn capture(&mut self, confirmation_code: impl Into<String>) -> Result<(), PaymentError> {
        if !self.status.can_capture() {
            return Err(PaymentError::InvalidStateTransition {
                current_status: self.status,
                action: "capture",
            });
        }
        self.record_attempt("capture", true, confirmation_code);
        self.status = PaymentStatus::Captured;
        Ok(())
    }

    /// Records a failed gateway operation and moves the payment to Failed.
    pub fn fail(
        &mut self,
        operation: &str,
        reason: impl Into<String>,
    ) -> Result<(), PaymentError> {
        if !self.status.can_fail() {
            return Err(PaymentError::InvalidStateTransition {
                current_status: self.status,
                action: "fail",
            });
        }
        self.record_attempt(operation, false, reason);
        self.status = PaymentStatus::Failed;
        Ok(())
    }

    /// Records a successful refund. Requires a prior capture.
    pub fn refund(&mut self, confirmation_code: impl Into<String>) -> Result<(), PaymentError> {
        if !self.status.can_refund() {
            return Err(PaymentError::InvalidStateTransition {
                current_status: self.status,
                action: "refund",
            });
        }
        self.record_attempt("refund", true, confirmation_code);
        self.status = PaymentStatus::Refunded;
        Ok(())
    }

    /// Cancels the payment. Allowed in any pre-capture status.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        if !self.status.can_cancel() {
            return Err(PaymentError::InvalidStateTransition {
                current_status: self.status,
                action: "cancel",
            });
        }
        self.record_attempt("cancel", true, reason);
        self.status = PaymentStatus::Cancelled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initiate_payment() -> Payment {
        Payment::initiate(
            AggregateId::new(),
            Money::from_cents(2000),
            "USD",
            PaymentMethod::Card,
        )
        .unwrap()
    }

    #[test]
    fn test_initiate() {
        let payment = initiate_payment();
        assert_eq!(payment.status(), PaymentStatus::Initiated);
        assert_eq!(payment.amount().cents(), 2000);
        assert_eq!(payment.currency(), "USD");
        assert!(payment.attempts().is_empty());
    }

    #[test]
    fn test_initiate_with_zero_amount_fails() {
        let result = Payment::initiate(
            AggregateId::new(),
            Money::zero(),
            "USD",
            PaymentMethod::Card,
        );
        assert!(matches!(result, Err(PaymentError::InvalidAmount { .. })));
    }

    #[test]
    fn test_authorize_then_capture() {
        let mut payment = initiate_payment();

        payment.authorize("AUTH-123").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Authorized);

        payment.capture("CAP-456").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Captured);

        assert_eq!(payment.attempts().len(), 2);
        assert_eq!(payment.attempts()[0].operation, "authorize");
        assert!(payment.attempts()[0].success);
        assert_eq!(payment.attempts()[0].detail, "AUTH-123");
        assert_eq!(payment.attempts()[1].operation, "capture");
        assert_eq!(payment.attempts()[1].detail, "CAP-456");
    }

    #[test]
    fn test_capture_requires_authorization() {
        let mut payment = initiate_payment();
        let result = payment.capture("CAP-456");

        assert!(matches!(
            result,
            Err(PaymentError::InvalidStateTransition { .. })
        ));
        assert_eq!(payment.status(), PaymentStatus::Initiated);
        assert!(payment.attempts().is_empty());
    }

    #[test]
    fn test_fail_at_authorization() {
        let mut payment = initiate_payment();
        payment.fail("authorize", "insufficient funds").unwrap();

        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert!(payment.status().is_terminal());
        assert_eq!(payment.attempts().len(), 1);
        assert!(!payment.attempts()[0].success);
        assert_eq!(payment.attempts()[0].detail, "insufficient funds");
    }

    #[test]
    fn test_fail_at_capture_keeps_authorize_attempt() {
        let mut payment = initiate_payment();
        payment.authorize("AUTH-123").unwrap();
        payment.fail("capture", "card expired").unwrap();

        assert_eq!(payment.status(), PaymentStatus::Failed);
        assert_eq!(payment.attempts().len(), 2);
        assert!(payment.attempts()[0].success);
        assert!(!payment.attempts()[1].success);
    }

    #[test]
    fn test_refund_requires_capture() {
        let mut payment = initiate_payment();
        payment.authorize("AUTH-123").unwrap();

        let result = payment.refund("REF-789");
        assert!(matches!(
            result,
            Err(PaymentError::InvalidStateTransition { .. })
        ));

        payment.capture("CAP-456").unwrap();
        payment.refund("REF-789").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Refunded);
    }

    #[test]
    fn test_cancel_pre_capture() {
        let mut payment = initiate_payment();
        payment.cancel("customer request").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Cancelled);

        let mut payment = initiate_payment();
        payment.authorize("AUTH-123").unwrap();
        payment.cancel("customer request").unwrap();
        assert_eq!(payment.status(), PaymentStatus::Cancelled);
    }

    #[test]
    fn test_cannot_cancel_after_capture() {
        let mut payment = initiate_payment();
        payment.authorize("AUTH-123").unwrap();
        payment.capture("CAP-456").unwrap();

        let result = payment.cancel("too late");
        assert!(matches!(
            result,
            Err(PaymentError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn test_attempt_log_is_append_only() {
        let mut payment = initiate_payment();
        payment.authorize("AUTH-123").unwrap();
        payment.capture("CAP-456").unwrap();
        payment.refund("REF-789").unwrap();

        let operations: Vec<&str> = payment
            .attempts()
            .iter()
            .map(|a| a.operation.as_str())
            .collect();
        assert_eq!(operations, vec!["authorize", "capture", "refund"]);
    }

    #[test]
    fn test_serialization_roundtrip() {
        let mut payment = initiate_payment();
        payment.authorize("AUTH-123").unwrap();

        let json = serde_json::to_string(&payment).unwrap();
        let deserialized: Payment = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id(), payment.id());
        assert_eq!(deserialized.status(), PaymentStatus::Authorized);
        assert_eq!(deserialized.attempts().len(), 1);
    }
}
