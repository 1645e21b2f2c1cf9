//! API server state

use std::sync::Arc;

use crate::service::BookingService;

/// API server state
#[derive(Clone)]
pub struct AppState {
    /// Booking engine façade
    pub engine: Arc<BookingService>,
}

impl AppState {
    pub fn new(engine: Arc<BookingService>) -> Self {
        Self { engine }
    }
}
