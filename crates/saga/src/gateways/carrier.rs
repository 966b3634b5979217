//! Carrier client trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::AggregateId;
use domain::Address;

use crate::error::SagaError;

/// The carrier's answer to a booking request.
///
/// A refusal is a normal business answer; transport faults surface as
/// `Err(SagaError::Gateway)`.
#[derive(Debug, Clone)]
pub enum BookingResponse {
    /// The carrier accepted the booking.
    Booked {
        /// The carrier that will handle the shipment.
        carrier: String,
        /// Tracking number assigned by the carrier.
        tracking_number: String,
    },
    /// The carrier refused the booking.
    Refused {
        /// The carrier's stated reason.
        reason: String,
    },
}

/// Client for the external carrier.
#[async_trait]
pub trait CarrierClient: Send + Sync {
    /// Books a shipping label for the shipment.
    async fn book_label(
        &self,
        shipment_id: AggregateId,
        address: &Address,
    ) -> Result<BookingResponse, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryCarrierState {
    next_tracking: u32,
    booking_count: u32,
    refuse_booking: bool,
    fail_transport: bool,
}

/// In-memory carrier client for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCarrierClient {
    state: Arc<RwLock<InMemoryCarrierState>>,
}

impl InMemoryCarrierClient {
    /// Creates a new in-memory carrier that books everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures bookings to be refused.
    pub fn set_refuse_booking(&self, refuse: bool) {
        self.state.write().unwrap().refuse_booking = refuse;
    }

    /// Configures calls to fail at the transport level.
    pub fn set_fail_transport(&self, fail: bool) {
        self.state.write().unwrap().fail_transport = fail;
    }

    /// Returns the number of completed booking calls.
    pub fn booking_count(&self) -> u32 {
        self.state.read().unwrap().booking_count
    }
}

#[async_trait]
impl CarrierClient for InMemoryCarrierClient {
    async fn book_label(
        &self,
        _shipment_id: AggregateId,
        _address: &Address,
    ) -> Result<BookingResponse, SagaError> {
        let mut state = self.state.write().unwrap();
        if state.fail_transport {
            return Err(SagaError::Gateway("carrier unreachable".to_string()));
        }
        state.booking_count += 1;

        if state.refuse_booking {
            return Ok(BookingResponse::Refused {
                reason: "no capacity".to_string(),
            });
        }

        state.next_tracking += 1;
        Ok(BookingResponse::Booked {
            carrier: "FastShip".to_string(),
            tracking_number: format!("TRACK-{:06}", state.next_tracking),
        })
    }
}
