//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (monotonic time,
//! wall-clock time, randomness). State machines take instants as parameters;
//! drivers obtain them from an `Environment` so the same logic runs against
//! real clocks in production and a virtual clock in tests.

use std::time::Duration;

/// Abstract environment providing time and randomness.
///
/// Implementations must guarantee that `now()` never goes backwards within
/// one execution context, and that `random_bytes()` draws from a
/// cryptographically secure source in production.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The instant type used by this environment.
    ///
    /// Production uses `std::time::Instant`; tests use a virtual clock.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current monotonic time.
    fn now(&self) -> Self::Instant;

    /// Current wall-clock time as Unix seconds.
    ///
    /// Used for protocol fields the remote interprets (auth expiry, payment
    /// observation timestamps), never for elapsed-time arithmetic.
    fn unix_time(&self) -> u64;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this; protocol logic never does.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the buffer with random bytes.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64` (session nonces, provisional ids).
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }
}

/// Production environment backed by the OS clock and entropy source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn unix_time(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        use rand::RngCore;
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}

pub mod test_utils {
    //! Deterministic environment for unit tests.

    use std::{
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    };

    use super::Environment;

    /// Mock environment with a manually advanced virtual clock and a
    /// deterministic byte source.
    ///
    /// `now()` starts at an arbitrary origin; call [`MockEnv::advance`] to
    /// move time forward. `sleep` resolves only once the virtual clock has
    /// passed its deadline, so timers fire exactly when a test advances
    /// time. Random bytes are a counting sequence, so nonces and ids are
    /// stable across runs.
    #[derive(Clone)]
    pub struct MockEnv {
        inner: Arc<Mutex<MockState>>,
    }

    struct MockState {
        origin: Instant,
        elapsed: Duration,
        unix: u64,
        counter: u8,
    }

    impl MockEnv {
        /// Create a mock environment at time zero.
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: Arc::new(Mutex::new(MockState {
                    origin: Instant::now(),
                    elapsed: Duration::ZERO,
                    unix: 1_700_000_000,
                    counter: 0,
                })),
            }
        }

        /// Advance the virtual clock (monotonic and wall-clock together).
        pub fn advance(&self, by: Duration) {
            if let Ok(mut state) = self.inner.lock() {
                state.elapsed += by;
                state.unix += by.as_secs();
            }
        }
    }

    impl Default for MockEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Environment for MockEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.inner
                .lock()
                .map(|state| state.origin + state.elapsed)
                .unwrap_or_else(|_| Instant::now())
        }

        fn unix_time(&self) -> u64 {
            self.inner.lock().map(|state| state.unix).unwrap_or(0)
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            let env = self.clone();
            async move {
                let deadline = env.now() + duration;
                while env.now() < deadline {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            if let Ok(mut state) = self.inner.lock() {
                for byte in buffer.iter_mut() {
                    state.counter = state.counter.wrapping_add(1);
                    *byte = state.counter;
                }
            }
        }
    }
}
