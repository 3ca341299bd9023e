/*!
    run/pause control of the background loops of master and slaves
*/

use core::{
    future::poll_fn,
    sync::atomic::{AtomicU8, Ordering::*},
    task::{Poll, Waker},
    };

use crate::mutex::BusyMutex;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunState {
    /// paused by [Lifecycle::stop], the loop waits before its next iteration
    Idle,
    Running,
    /// the last bus operation failed, the loop keeps going and goes back to `Running` on the next success
    Error,
}

/// run state shared between a background loop and whoever controls it
pub struct Lifecycle {
    state: AtomicU8,
    waker: BusyMutex<Option<Waker>>,
}
impl Lifecycle {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(RunState::Running as u8),
            waker: BusyMutex::new(None),
        }
    }
    pub fn state(&self) -> RunState {
        match self.state.load(Acquire) {
            0 => RunState::Idle,
            1 => RunState::Running,
            _ => RunState::Error,
        }
    }
    /// resume the loop
    pub fn start(&self) {
        self.state.store(RunState::Running as u8, Release);
        if let Some(waker) = self.waker.try_lock().and_then(|mut waker| waker.take()) {
            waker.wake();
        }
    }
    /// pause the loop before its next iteration
    pub fn stop(&self) {
        self.state.store(RunState::Idle as u8, Release);
    }
    /// mark the last iteration failed, unless paused
    pub fn fault(&self) {
        let _ = self.state.compare_exchange(RunState::Running as u8, RunState::Error as u8, AcqRel, Acquire);
    }
    /// mark the last iteration succeeded, unless paused
    pub fn recover(&self) {
        let _ = self.state.compare_exchange(RunState::Error as u8, RunState::Running as u8, AcqRel, Acquire);
    }
    /// wait until the loop is allowed to run
    pub async fn resumed(&self) {
        poll_fn(|context| {
            if self.state() != RunState::Idle
                {return Poll::Ready(())}
            if let Some(mut waker) = self.waker.try_lock() {
                waker.replace(context.waker().clone());
            }
            else {
                // start() is waking, poll again soon
                context.waker().wake_by_ref();
            }
            // start() may have happened before the waker was registered
            if self.state() != RunState::Idle
                {Poll::Ready(())}
            else
                {Poll::Pending}
        }).await
    }
}
impl Default for Lifecycle {
    fn default() -> Self {Self::new()}
}
