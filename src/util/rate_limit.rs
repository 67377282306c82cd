//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Move message rate limit per connection. Clients send at most one move per
/// rendered frame, so anything past double the tick rate is junk.
pub const MOVE_RATE_LIMIT: u32 = 150;

/// Per-connection rate limiter state
#[derive(Clone)]
pub struct PlayerRateLimiter {
    move_limiter: Arc<Limiter>,
}

impl PlayerRateLimiter {
    pub fn new() -> Self {
        Self {
            move_limiter: create_limiter(MOVE_RATE_LIMIT),
        }
    }

    /// Check if a move message is allowed (returns true if allowed)
    pub fn check_move(&self) -> bool {
        self.move_limiter.check().is_ok()
    }
}

impl Default for PlayerRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
