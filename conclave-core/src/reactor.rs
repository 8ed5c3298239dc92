//! Cooperative event loop.
//!
//! Single-threaded: the reactor owns the dispatcher (and through it
//! all mutable state) and multiplexes the transport poll with the
//! timer wheel. The only suspension point is the poll; handlers and
//! timer callbacks run to completion before the next event is read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::timer::{TimerHandle, TimerWheel};
use crate::transport::Transport;

/// Cloneable, thread-safe request to stop a running loop. The flag is
/// observed at the top of each iteration; in-flight handlers complete.
#[derive(Debug, Clone)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The event loop driving a dispatcher.
pub struct Reactor<T: Transport> {
    dispatcher: Dispatcher<T>,
    timers: TimerWheel<T>,
    shutdown: Arc<AtomicBool>,
}

impl<T: Transport> Reactor<T> {
    pub fn new(dispatcher: Dispatcher<T>) -> Self {
        Self {
            dispatcher,
            timers: TimerWheel::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher<T> {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher<T> {
        &mut self.dispatcher
    }

    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown.clone())
    }

    /// Schedule a repeating timer on this loop.
    pub fn schedule_repeating(
        &mut self,
        interval: Duration,
        callback: impl FnMut(&mut Dispatcher<T>) + Send + 'static,
    ) -> TimerHandle {
        self.timers.schedule_repeating(interval, callback)
    }

    /// Process pending transport events and due timers, then return.
    ///
    /// The transport poll waits at most `timeout`, shortened to the
    /// next timer due time. After the first event, anything already
    /// pending is drained (bounded by the configured drain limit) so a
    /// burst is handled in one iteration.
    ///
    /// # Errors
    ///
    /// Only a transport failure is returned; verb handling never fails.
    pub fn step(&mut self, timeout: Option<Duration>) -> Result<()> {
        let poll_timeout = clip_to_deadline(timeout, self.timers.next_due());
        if let Some(frames) = self.dispatcher.poll_transport(poll_timeout)? {
            self.dispatcher.handle_frames(&frames);
            for _ in 1..self.dispatcher.options().drain_limit {
                match self.dispatcher.poll_transport(Some(Duration::ZERO))? {
                    Some(frames) => self.dispatcher.handle_frames(&frames),
                    None => break,
                }
            }
        }
        self.timers.fire_due(&mut self.dispatcher);
        self.dispatcher.flush();
        Ok(())
    }

    /// Repeat [`Reactor::step`] until a shutdown request is observed
    /// or the transport fails, then tear down.
    ///
    /// # Errors
    ///
    /// Returns the transport failure that ended the loop, if any.
    pub fn run(&mut self, timeout: Option<Duration>) -> Result<()> {
        let mut outcome = Ok(());
        while !self.shutdown.load(Ordering::Acquire) {
            if let Err(e) = self.step(timeout) {
                error!(error = %e, "transport failure; shutting down");
                self.shutdown.store(true, Ordering::Release);
                outcome = Err(e);
            }
        }
        self.teardown();
        outcome
    }

    /// Request shutdown and release loop resources. Safe to call more
    /// than once.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.teardown();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Drain the transport once more, tear down timers, stop the
    /// transport. Idempotent.
    fn teardown(&mut self) {
        for _ in 0..self.dispatcher.options().drain_limit {
            match self.dispatcher.poll_transport(Some(Duration::ZERO)) {
                Ok(Some(frames)) => self.dispatcher.handle_frames(&frames),
                Ok(None) | Err(_) => break,
            }
        }
        self.timers.clear();
        if let Err(e) = self.dispatcher.stop_transport() {
            debug!(error = %e, "transport stop failed");
        }
    }
}

/// Shorten a poll timeout so the next timer never waits behind it.
fn clip_to_deadline(timeout: Option<Duration>, next_due: Option<Instant>) -> Option<Duration> {
    match next_due {
        None => timeout,
        Some(due) => {
            let until = due.saturating_duration_since(Instant::now());
            Some(timeout.map_or(until, |t| t.min(until)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inproc::InprocHub;
    use crate::options::NodeOptions;
    use crate::path::Path;
    use crate::tree::Attribute;
    use crate::value::{Access, Value};
    use crate::wire::Request;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn step_drains_pending_bursts() {
        let hub = InprocHub::new();
        let node = Dispatcher::new(hub.attach("node"), NodeOptions::default()).unwrap();
        let mut reactor = Reactor::new(node);
        let mut raw = hub.attach("raw");

        // enter + two MODs are pending; one step should take them all
        let raw_id = {
            raw.whisper(
                reactor.dispatcher().uuid(),
                Request::Mod(json!({"_name": "raw"})).encode(),
            )
            .unwrap();
            raw.whisper(
                reactor.dispatcher().uuid(),
                Request::Mod(json!({"a": {"value": 1, "typeHint": "int", "access": "r"}}))
                    .encode(),
            )
            .unwrap();
            raw.uuid()
        };

        reactor.step(Some(Duration::ZERO)).unwrap();
        let mirror = &reactor.dispatcher().peers().get(raw_id).unwrap().capability;
        assert_eq!(mirror.meta.name.as_deref(), Some("raw"));
        assert_eq!(
            mirror.attribute(&Path::parse("a")).unwrap().value,
            Value::Int(1)
        );
    }

    #[test]
    fn timers_fire_during_steps() {
        let hub = InprocHub::new();
        let node = Dispatcher::new(hub.attach("node"), NodeOptions::default()).unwrap();
        let mut reactor = Reactor::new(node);
        reactor
            .dispatcher_mut()
            .register_attr(&Path::root(), "ticks", Attribute::new(0i64, Access::re()));

        let _handle = reactor.schedule_repeating(Duration::from_millis(5), |d| {
            let next = match d.value(&Path::parse("ticks")) {
                Some(Value::Int(n)) => n + 1,
                _ => 0,
            };
            d.set_value(&Path::parse("ticks"), next).unwrap();
        });

        // poll timeout is clipped to the timer deadline, so a generous
        // step timeout still fires the timer on time
        reactor.step(Some(Duration::from_secs(5))).unwrap();
        std::thread::sleep(Duration::from_millis(6));
        reactor.step(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(
            reactor.dispatcher().value(&Path::parse("ticks")),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn run_observes_shutdown_handle() {
        let hub = InprocHub::new();
        let node = Dispatcher::new(hub.attach("node"), NodeOptions::default()).unwrap();
        let mut reactor = Reactor::new(node);
        let handle = reactor.shutdown_handle();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let stopper = handle.clone();
        let _timer = reactor.schedule_repeating(Duration::from_millis(1), move |_d| {
            if counter.fetch_add(1, Ordering::SeqCst) >= 2 {
                stopper.stop();
            }
        });

        reactor.run(Some(Duration::from_millis(20))).unwrap();
        assert!(handle.is_stopped());
        assert!(hits.load(Ordering::SeqCst) >= 3);
        assert_eq!(hub.len(), 0, "teardown stops the transport");
    }

    #[test]
    fn stop_is_idempotent() {
        let hub = InprocHub::new();
        let node = Dispatcher::new(hub.attach("node"), NodeOptions::default()).unwrap();
        let mut reactor = Reactor::new(node);
        reactor.stop();
        reactor.stop();
        assert!(reactor.is_stopped());
        assert_eq!(hub.len(), 0);
    }

    #[test]
    fn poll_after_stop_is_quiet() {
        let hub = InprocHub::new();
        let node = Dispatcher::new(hub.attach("node"), NodeOptions::default()).unwrap();
        let mut reactor = Reactor::new(node);
        reactor.stop();
        // stepping a stopped reactor must not error out
        reactor.step(Some(Duration::ZERO)).unwrap();
    }
}
