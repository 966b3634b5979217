//! Payment gateway (PSP) trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::Money;

use crate::error::SagaError;

/// The outcome of a gateway operation that completed.
///
/// A decline is a normal business answer, not an error: the transport
/// succeeded and the gateway said no. Transport faults surface as
/// `Err(SagaError::Gateway)` and are retried by the resilience policy.
#[derive(Debug, Clone)]
pub enum GatewayResponse {
    /// The gateway approved the operation.
    Approved {
        /// Opaque confirmation code for the audit trail.
        confirmation_code: String,
    },
    /// The gateway refused the operation.
    Declined {
        /// The gateway's stated reason.
        reason: String,
    },
}

/// Client for the external payment service provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Places an authorization hold for the amount.
    async fn authorize(
        &self,
        order_id: AggregateId,
        amount: Money,
    ) -> Result<GatewayResponse, SagaError>;

    /// Captures a previously authorized amount.
    async fn capture(
        &self,
        order_id: AggregateId,
        amount: Money,
    ) -> Result<GatewayResponse, SagaError>;

    /// Returns a previously captured amount.
    async fn refund(
        &self,
        order_id: AggregateId,
        amount: Money,
    ) -> Result<GatewayResponse, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    next_code: u32,
    authorize_count: u32,
    capture_count: u32,
    refund_count: u32,
    decline_authorize: bool,
    decline_capture: bool,
    fail_transport: bool,
}

/// In-memory payment gateway for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway that approves everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures authorize calls to be declined.
    pub fn set_decline_authorize(&self, decline: bool) {
        self.state.write().unwrap().decline_authorize = decline;
    }

    /// Configures capture calls to be declined.
    pub fn set_decline_capture(&self, decline: bool) {
        self.state.write().unwrap().decline_capture = decline;
    }

    /// Configures all calls to fail at the transport level.
    pub fn set_fail_transport(&self, fail: bool) {
        self.state.write().unwrap().fail_transport = fail;
    }

    /// Returns the number of authorize calls made.
    pub fn authorize_count(&self) -> u32 {
        self.state.read().unwrap().authorize_count
    }

    /// Returns the number of capture calls made.
    pub fn capture_count(&self) -> u32 {
        self.state.read().unwrap().capture_count
    }

    /// Returns the number of refund calls made.
    pub fn refund_count(&self) -> u32 {
        self.state.read().unwrap().refund_count
    }

    fn next_code(state: &mut InMemoryGatewayState, prefix: &str) -> String {
        state.next_code += 1;
        format!("{}-{:04}", prefix, state.next_code)
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn authorize(
        &self,
        _order_id: AggregateId,
        _amount: Money,
    ) -> Result<GatewayResponse, SagaError> {
        let mut state = self.state.write().unwrap();
        if state.fail_transport {
            return Err(SagaError::Gateway("connection refused".to_string()));
        }
        state.authorize_count += 1;

        if state.decline_authorize {
            return Ok(GatewayResponse::Declined {
                reason: "insufficient funds".to_string(),
            });
        }

        let code = Self::next_code(&mut state, "AUTH");
        Ok(GatewayResponse::Approved {
            confirmation_code: code,
        })
    }

    async fn capture(
        &self,
        _order_id: AggregateId,
        _amount: Money,
    ) -> Result<GatewayResponse, SagaError> {
        let mut state = self.state.write().unwrap();
        if state.fail_transport {
            return Err(SagaError::Gateway("connection refused".to_string()));
        }
        state.capture_count += 1;

        if state.decline_capture {
            return Ok(GatewayResponse::Declined {
                reason: "capture refused".to_string(),
            });
        }

        let code = Self::next_code(&mut state, "CAP");
        Ok(GatewayResponse::Approved {
            confirmation_code: code,
        })
    }

    async fn refund(
        &self,
        _order_id: AggregateId,
        _amount: Money,
    ) -> Result<GatewayResponse, SagaError> {
        let mut state = self.state.write().unwrap();
        if state.fail_transport {
            return Err(SagaError::Gateway("connection refused".to_string()));
        }
        state.refund_count += 1;

        let code = Self::next_code(&mut state, "REF");
        Ok(GatewayResponse::Approved {
            confirmation_code: code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_approves_by_default() {
        let gateway = InMemoryPaymentGateway::new();
        let response = gateway
            .authorize(AggregateId::new(), Money::from_cents(1000))
            .await
            .unwrap();

        assert!(matches!(
            response,
            GatewayResponse::Approved { confirmation_code } if confirmation_code.starts_with("AUTH-")
        ));
        assert_eq!(gateway.authorize_count(), 1);
    }

    #[tokio::test]
    async fn test_decline_is_not_an_error() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_decline_authorize(true);

        let response = gateway
            .authorize(AggregateId::new(), Money::from_cents(1000))
            .await
            .unwrap();

        assert!(matches!(response, GatewayResponse::Declined { .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let gateway = InMemoryPaymentGateway::new();
        gateway.set_fail_transport(true);

        let result = gateway
            .capture(AggregateId::new(), Money::from_cents(1000))
            .await;

        assert!(matches!(result, Err(SagaError::Gateway(_))));
        assert_eq!(gateway.capture_count(), 0);
    }

    #[tokio::test]
    async fn test_sequential_confirmation_codes() {
        let gateway = InMemoryPaymentGateway::new();
        let order_id = AggregateId::new();

        let first = gateway
            .authorize(order_id, Money::from_cents(1000))
            .await
            .unwrap();
        let second = gateway
            .capture(order_id, Money::from_cents(1000))
            .await
            .unwrap();

        match (first, second) {
            (
                GatewayResponse::Approved {
                    confirmation_code: a,
                },
                GatewayResponse::Approved {
                    confirmation_code: b,
                },
            ) => {
                assert_eq!(a, "AUTH-0001");
                assert_eq!(b, "CAP-0002");
            }
            other => panic!("expected approvals, got {:?}", other),
        }
    }
}
