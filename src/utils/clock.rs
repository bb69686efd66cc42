use std::{marker::PhantomData, mem::MaybeUninit, time::Duration};

/// Id for a clock according to unix clockid_t
pub trait ClockSource {
    /// Gets the id of the clock source
    fn id() -> libc::clockid_t;
}

/// Marker for clock source that never returns a negative [`Time`]
pub trait NonNegativeClockSource: ClockSource {}

/// Monotonic clock
#[derive(Debug)]
pub struct Monotonic;

impl ClockSource for Monotonic {
    fn id() -> libc::clockid_t {
        libc::CLOCK_MONOTONIC
    }
}

impl NonNegativeClockSource for Monotonic {}

/// Defines a clock with a specific kind
#[derive(Debug)]
pub struct Clock<Kind> {
    clk_id: libc::clockid_t,
    _kind: PhantomData<Kind>,
}

impl<Kind: ClockSource> Clock<Kind> {
    /// Initialize a new clock, failing if the clock can not be read
    pub fn new() -> std::io::Result<Self> {
        let clk_id = Kind::id();
        clock_get_time(clk_id)?;
        Ok(Clock {
            clk_id,
            _kind: PhantomData,
        })
    }

    /// Returns the current time
    pub fn now(&self) -> std::io::Result<Time<Kind>> {
        clock_get_time(self.clk_id).map(|tp| Time {
            tp,
            _kind: PhantomData,
        })
    }
}

/// A point in time for a clock with a specific kind
pub struct Time<Kind> {
    tp: libc::timespec,
    _kind: PhantomData<Kind>,
}

impl<Kind> Clone for Time<Kind> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Kind> Copy for Time<Kind> {}

impl<Kind> std::fmt::Debug for Time<Kind> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Time")
            .field("tv_sec", &self.tp.tv_sec)
            .field("tv_nsec", &self.tp.tv_nsec)
            .finish()
    }
}

impl<Kind: NonNegativeClockSource> From<Time<Kind>> for Duration {
    fn from(time: Time<Kind>) -> Self {
        Duration::new(time.tp.tv_sec as u64, time.tp.tv_nsec as u32)
    }
}

fn clock_get_time(clk_id: libc::clockid_t) -> std::io::Result<libc::timespec> {
    let mut tp = MaybeUninit::zeroed();
    // SAFETY: `tp` is valid for writes and initialized by a successful call
    unsafe {
        if libc::clock_gettime(clk_id, tp.as_mut_ptr()) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(tp.assume_init())
    }
}
