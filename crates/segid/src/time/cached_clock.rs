use alloc::sync::Arc;
use core::time::Duration;
use std::{
    sync::OnceLock,
    thread::{self, JoinHandle},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use portable_atomic::{AtomicBool, AtomicI64, Ordering};

use crate::time::TimeSource;

/// Shared ticker thread that refreshes the cached reading once per second.
#[derive(Debug)]
struct SharedTickerInner {
    current: AtomicI64,
    ticking: AtomicBool,
    _handle: OnceLock<JoinHandle<()>>,
}

static SHARED: OnceLock<CachedClock> = OnceLock::new();

/// A coarse wall clock, in seconds since the UNIX epoch, read from an atomic
/// that a background ticker refreshes roughly once per second.
///
/// Expiry checks run on every `next_id` call; a cached reading keeps the hot
/// path free of syscalls. The ticker measures elapsed time with [`Instant`]
/// from a wall-clock origin captured at construction, so the reading never goes
/// backward even if the system clock is adjusted.
///
/// The ticker only holds a weak reference and exits once every handle to the
/// clock has been dropped. Most callers want the process-wide
/// [`CachedClock::shared`] instance.
#[derive(Clone, Debug)]
pub struct CachedClock {
    inner: Arc<SharedTickerInner>,
}

impl Default for CachedClock {
    /// Returns a handle to the process-wide [`CachedClock::shared`] instance.
    fn default() -> Self {
        Self::shared()
    }
}

impl CachedClock {
    /// Returns a handle to the process-wide clock, starting its ticker on
    /// first use.
    pub fn shared() -> Self {
        SHARED.get_or_init(Self::new).clone()
    }

    /// Starts a new clock with its own ticker thread.
    ///
    /// If the ticker thread cannot be spawned the clock falls back to reading
    /// the system time on every call.
    pub fn new() -> Self {
        let start = Instant::now();
        let origin = system_secs();

        let inner = Arc::new(SharedTickerInner {
            current: AtomicI64::new(origin),
            ticking: AtomicBool::new(false),
            _handle: OnceLock::new(),
        });

        let weak_inner = Arc::downgrade(&inner);
        let spawned = thread::Builder::new()
            .name("segid-clock".into())
            .spawn(move || {
                let mut tick = 1;

                loop {
                    // Compute the absolute target time of the next tick
                    let target = start + Duration::from_secs(tick);
                    let now = Instant::now();
                    if now < target {
                        thread::sleep(target - now);
                    }

                    let Some(inner_ref) = weak_inner.upgrade() else {
                        break;
                    };

                    let elapsed = start.elapsed().as_secs();
                    #[allow(clippy::cast_possible_wrap)]
                    inner_ref
                        .current
                        .store(origin + elapsed as i64, Ordering::Relaxed);

                    tick = elapsed + 1;
                }
            });

        match spawned {
            Ok(handle) => {
                inner.ticking.store(true, Ordering::Release);
                let _ = inner._handle.set(handle);
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("clock ticker unavailable, reading system time directly: {_e}");
            }
        }

        Self { inner }
    }
}

impl TimeSource for CachedClock {
    fn current_secs(&self) -> i64 {
        if self.inner.ticking.load(Ordering::Acquire) {
            self.inner.current.load(Ordering::Relaxed)
        } else {
            system_secs()
        }
    }
}

fn system_secs() -> i64 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
