//! Device access brokering.
//!
//! Opening a board may require the platform's consent (a user-facing prompt
//! on mobile OSes; implicit on desktops, where the open call itself fails if
//! the OS objects). The [`AccessBroker`] turns that asynchronous decision
//! into a bounded, tri-state wait, and reacts to platform events on behalf
//! of the connection manager:
//!
//! - a grant triggers [`LinkManager::open`] for the granted device,
//! - a denial is reported once through the event fan-out,
//! - a detach while connected closes the connection, deliberately without
//!   checking which endpoint detached. Enumeration identity is not stable
//!   across hubs and re-plugs, so the conservative reading of "something was
//!   unplugged" is "assume it was ours".
//!
//! Platform decisions and detach notifications arrive on one channel, fed by
//! an [`AccessAuthority`] and (optionally) a [`DetachWatcher`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::device::{DeviceInfo, list_devices};
use crate::error::Result;
use crate::link::LinkManager;

/// Default bound on how long an access request may stay unanswered.
pub const ACCESS_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the detach watcher re-enumerates the attached devices.
pub const DETACH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A platform-originated event the broker reacts to.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The platform answered an access request.
    Decision {
        /// The device the decision concerns.
        device: DeviceInfo,
        /// Whether access was granted.
        granted: bool,
    },
    /// A device was detached from the host.
    Detached {
        /// The device that vanished.
        device: DeviceInfo,
    },
}

/// Result of a bounded access request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// Access was granted; the broker has started opening the connection.
    Granted,
    /// The platform (or the user) refused access.
    Denied,
    /// No decision arrived before the deadline.
    TimedOut,
}

/// The seam to the platform's consent mechanism.
///
/// Implementations ask the OS for access to `device` and deliver the answer
/// as a [`PlatformEvent::Decision`] on the provided channel, from whatever
/// thread the platform calls back on.
pub trait AccessAuthority: Send + Sync {
    /// Issue an access request for the device.
    fn request(&self, device: &DeviceInfo, decisions: &Sender<PlatformEvent>) -> Result<()>;
}

/// Authority for desktop platforms, where there is no runtime prompt: access
/// control happens at open time, so every request resolves to an immediate
/// grant and open failures surface through the connection manager.
pub struct AutoGrantAuthority;

impl AccessAuthority for AutoGrantAuthority {
    fn request(&self, device: &DeviceInfo, decisions: &Sender<PlatformEvent>) -> Result<()> {
        decisions
            .send(PlatformEvent::Decision {
                device: device.clone(),
                granted: true,
            })
            .map_err(|_| {
                crate::error::Error::PermissionDenied("access broker is shut down".into())
            })
    }
}

type WaiterMap = Arc<Mutex<HashMap<String, Sender<AccessOutcome>>>>;

/// Broker between the platform's consent/detach events and the connection
/// manager.
pub struct AccessBroker {
    manager: Arc<LinkManager>,
    authority: Box<dyn AccessAuthority>,
    events: Sender<PlatformEvent>,
    waiters: WaiterMap,
}

impl AccessBroker {
    /// Create a broker and start its dispatch thread.
    ///
    /// The thread runs until the broker and every cloned platform handle
    /// have been dropped.
    pub fn new(manager: Arc<LinkManager>, authority: Box<dyn AccessAuthority>) -> Self {
        let (tx, rx) = channel();
        let waiters: WaiterMap = Arc::new(Mutex::new(HashMap::new()));

        let dispatch_manager = Arc::clone(&manager);
        let dispatch_waiters = Arc::clone(&waiters);
        thread::spawn(move || dispatch_loop(&rx, &dispatch_manager, &dispatch_waiters));

        Self {
            manager,
            authority,
            events: tx,
            waiters,
        }
    }

    /// A sender the platform glue (or a [`DetachWatcher`]) can feed events
    /// into.
    pub fn platform_handle(&self) -> Sender<PlatformEvent> {
        self.events.clone()
    }

    /// Request access to a device, waiting up to [`ACCESS_TIMEOUT`].
    pub fn request_access(&self, device: &DeviceInfo) -> AccessOutcome {
        self.request_access_within(device, ACCESS_TIMEOUT)
    }

    /// Request access to a device, waiting at most `deadline` for the
    /// platform's answer.
    ///
    /// A newer request for the same endpoint replaces an older pending one;
    /// the replaced waiter resolves `TimedOut` at its own deadline. On a
    /// grant the broker proceeds to open the connection (watch the
    /// manager's events for the outcome); on a denial exactly one
    /// `ConnectionError` is emitted and the state stays `Disconnected`.
    pub fn request_access_within(&self, device: &DeviceInfo, deadline: Duration) -> AccessOutcome {
        let (decision_tx, decision_rx) = channel();
        lock_waiters(&self.waiters).insert(device.name.clone(), decision_tx);

        debug!("requesting access to {}", device.name);
        if let Err(e) = self.authority.request(device, &self.events) {
            self.remove_waiter(&device.name);
            self.manager.report_error(e.to_string());
            return AccessOutcome::Denied;
        }

        match decision_rx.recv_timeout(deadline) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                self.remove_waiter(&device.name);
                warn!(
                    "access request for {} unanswered after {:?}",
                    device.name, deadline
                );
                AccessOutcome::TimedOut
            },
        }
    }

    fn remove_waiter(&self, name: &str) {
        lock_waiters(&self.waiters).remove(name);
    }
}

fn lock_waiters(waiters: &WaiterMap) -> MutexGuard<'_, HashMap<String, Sender<AccessOutcome>>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dispatch_loop(rx: &Receiver<PlatformEvent>, manager: &LinkManager, waiters: &WaiterMap) {
    for event in rx.iter() {
        match event {
            PlatformEvent::Decision { device, granted } => {
                let waiter = lock_waiters(waiters).remove(&device.name);

                if granted {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(AccessOutcome::Granted);
                    }
                    if let Err(e) = manager.open(&device) {
                        debug!("open after grant failed for {}: {e}", device.name);
                    }
                } else {
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(AccessOutcome::Denied);
                    }
                    manager.report_error(format!("permission denied for {}", device.name));
                }
            },
            PlatformEvent::Detached { device } => {
                if manager.is_connected() {
                    info!(
                        "device detached ({}), closing the active connection",
                        device.name
                    );
                    manager.disconnect();
                } else {
                    debug!("device detached ({}) with no connection open", device.name);
                }
            },
        }
    }
    debug!("access dispatch loop finished");
}

/// Background watcher translating "an endpoint vanished from enumeration"
/// into [`PlatformEvent::Detached`] notifications.
///
/// Desktop platforms deliver no detach broadcast we can subscribe to from
/// here, so the watcher diffs enumeration snapshots on a fixed cadence.
pub struct DetachWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl DetachWatcher {
    /// Start watching; detach events go to `events`.
    pub fn spawn(events: Sender<PlatformEvent>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let mut known = list_devices();
            while !stop_flag.load(Ordering::Relaxed) {
                thread::sleep(DETACH_POLL_INTERVAL);
                if stop_flag.load(Ordering::Relaxed) {
                    break;
                }

                let current = list_devices();
                for device in &known {
                    if !current.iter().any(|c| c.same_endpoint(device)) {
                        debug!("endpoint {} no longer enumerated", device.name);
                        if events
                            .send(PlatformEvent::Detached {
                                device: device.clone(),
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                known = current;
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the watcher and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DetachWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LinkEvent;
    use crate::port::mock::MockPort;

    /// Authority that refuses every request.
    struct DenyAllAuthority;

    impl AccessAuthority for DenyAllAuthority {
        fn request(&self, device: &DeviceInfo, decisions: &Sender<PlatformEvent>) -> Result<()> {
            decisions
                .send(PlatformEvent::Decision {
                    device: device.clone(),
                    granted: false,
                })
                .ok();
            Ok(())
        }
    }

    /// Authority that never answers (user walked away from the prompt).
    struct SilentAuthority;

    impl AccessAuthority for SilentAuthority {
        fn request(&self, _device: &DeviceInfo, _decisions: &Sender<PlatformEvent>) -> Result<()> {
            Ok(())
        }
    }

    fn recv_event(
        rx: &std::sync::mpsc::Receiver<LinkEvent>,
        what: &str,
    ) -> LinkEvent {
        rx.recv_timeout(Duration::from_secs(2))
            .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
    }

    #[test]
    fn test_denied_request_emits_one_error_and_stays_disconnected() {
        let manager = Arc::new(LinkManager::new());
        let rx = manager.subscribe();
        let broker = AccessBroker::new(Arc::clone(&manager), Box::new(DenyAllAuthority));

        let device = DeviceInfo::unclassified("/dev/ttyACM0");
        let outcome = broker.request_access_within(&device, Duration::from_secs(2));
        assert_eq!(outcome, AccessOutcome::Denied);

        match recv_event(&rx, "denial notification") {
            LinkEvent::ConnectionError(msg) => {
                assert!(msg.contains("permission denied"));
                assert!(msg.contains("/dev/ttyACM0"));
            },
            other => panic!("expected ConnectionError, got {other:?}"),
        }
        assert!(!manager.is_connected());
        // Exactly one notification.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_unanswered_request_times_out() {
        let manager = Arc::new(LinkManager::new());
        let broker = AccessBroker::new(Arc::clone(&manager), Box::new(SilentAuthority));

        let device = DeviceInfo::unclassified("/dev/ttyACM0");
        let outcome = broker.request_access_within(&device, Duration::from_millis(50));
        assert_eq!(outcome, AccessOutcome::TimedOut);
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_granted_request_attempts_open() {
        let manager = Arc::new(LinkManager::new());
        let rx = manager.subscribe();
        let broker = AccessBroker::new(Arc::clone(&manager), Box::new(AutoGrantAuthority));

        // No such endpoint exists, so the grant resolves but the open fails;
        // the failure must come through the fan-out.
        let device = DeviceInfo::unclassified("/dev/replink-no-such-port");
        let outcome = broker.request_access_within(&device, Duration::from_secs(2));
        assert_eq!(outcome, AccessOutcome::Granted);

        match recv_event(&rx, "open failure") {
            LinkEvent::ConnectionError(msg) => assert!(msg.contains("replink-no-such-port")),
            other => panic!("expected ConnectionError, got {other:?}"),
        }
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_detach_while_connected_disconnects_any_device() {
        let manager = Arc::new(LinkManager::new());
        let (port, _state) = MockPort::new("mock0");
        manager.attach(Box::new(port), DeviceInfo::unclassified("mock0"));
        let rx = manager.subscribe();

        let broker = AccessBroker::new(Arc::clone(&manager), Box::new(AutoGrantAuthority));
        // A different endpoint detaching still closes the connection.
        broker
            .platform_handle()
            .send(PlatformEvent::Detached {
                device: DeviceInfo::unclassified("some-other-endpoint"),
            })
            .unwrap();

        match recv_event(&rx, "disconnect notification") {
            LinkEvent::Disconnected => {},
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(!manager.is_connected());
        // Exactly one notification for the teardown.
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_detach_while_disconnected_is_ignored() {
        let manager = Arc::new(LinkManager::new());
        let rx = manager.subscribe();
        let broker = AccessBroker::new(Arc::clone(&manager), Box::new(AutoGrantAuthority));

        broker
            .platform_handle()
            .send(PlatformEvent::Detached {
                device: DeviceInfo::unclassified("mock0"),
            })
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(!manager.is_connected());
    }

    #[test]
    fn test_watcher_stop_is_prompt_and_idempotent() {
        let manager = Arc::new(LinkManager::new());
        let broker = AccessBroker::new(manager, Box::new(AutoGrantAuthority));
        let mut watcher = DetachWatcher::spawn(broker.platform_handle());
        watcher.stop();
        watcher.stop();
    }
}
