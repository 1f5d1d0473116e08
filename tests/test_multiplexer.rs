// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the service bus multiplexer: provider ordering, start
// idempotence, the registration window, thread affinity, and the
// one-shot ownership result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use busmux::{
    BusConnection, ClaimStatus, ExportedEndpoint, MuxError, OwnershipCallback, OwnershipPolicy,
    ServiceMultiplexer, ServiceProvider,
};

// ===========================================================================
// Test doubles
// ===========================================================================

/// Bus double: records ownership requests and lets the test deliver the
/// result by hand, as many times as it likes.
#[derive(Default)]
struct TestBus {
    requests: Mutex<Vec<(String, OwnershipPolicy)>>,
    pending: Mutex<Vec<(String, OwnershipCallback)>>,
    endpoints: Mutex<HashMap<String, Arc<ExportedEndpoint>>>,
    export_calls: AtomicUsize,
}

impl TestBus {
    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_policy(&self) -> Option<OwnershipPolicy> {
        self.requests.lock().unwrap().last().map(|(_, p)| *p)
    }

    /// Invoke the most recent pending callback without consuming it.
    fn deliver_last(&self, granted: bool) {
        let pending = self.pending.lock().unwrap();
        let (name, cb) = pending.last().expect("no pending ownership request");
        cb(name, granted);
    }
}

impl BusConnection for TestBus {
    fn request_ownership(&self, name: &str, policy: OwnershipPolicy, on_result: OwnershipCallback) {
        self.requests.lock().unwrap().push((name.to_owned(), policy));
        self.pending.lock().unwrap().push((name.to_owned(), on_result));
    }

    fn exported_endpoint(&self, path: &str) -> Arc<ExportedEndpoint> {
        self.export_calls.fetch_add(1, Ordering::Relaxed);
        let mut endpoints = self.endpoints.lock().unwrap();
        Arc::clone(
            endpoints
                .entry(path.to_owned())
                .or_insert_with(|| Arc::new(ExportedEndpoint::new(path))),
        )
    }
}

/// Provider double: records each `start` call with the endpoint it got.
struct RecordingProvider {
    id: usize,
    log: Arc<Mutex<Vec<(usize, Arc<ExportedEndpoint>)>>>,
}

impl ServiceProvider for RecordingProvider {
    fn start(&mut self, endpoint: &Arc<ExportedEndpoint>) {
        self.log.lock().unwrap().push((self.id, Arc::clone(endpoint)));
    }
}

/// Provider double: records the moment it is dropped.
struct DropProbe {
    id: usize,
    drops: Arc<Mutex<Vec<usize>>>,
}

impl ServiceProvider for DropProbe {
    fn start(&mut self, _endpoint: &Arc<ExportedEndpoint>) {}
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.drops.lock().unwrap().push(self.id);
    }
}

fn mux_over(bus: &Arc<TestBus>) -> ServiceMultiplexer {
    let conn: Arc<dyn BusConnection> = Arc::clone(bus) as Arc<dyn BusConnection>;
    ServiceMultiplexer::new(conn, "org.test.Service", "/org/test/Service")
}

// ===========================================================================
// Registration and start ordering
// ===========================================================================

#[test]
fn providers_start_in_registration_order_with_one_shared_endpoint() {
    let bus = Arc::new(TestBus::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mux = mux_over(&bus);

    for id in 1..=3 {
        mux.register_service_provider(Box::new(RecordingProvider {
            id,
            log: Arc::clone(&log),
        }))
        .expect("register");
    }
    assert_eq!(mux.provider_count(), 3);
    assert!(mux.endpoint().is_none());

    mux.start().expect("start");

    // One ownership request, with the replacement policy.
    assert_eq!(bus.request_count(), 1);
    assert_eq!(
        bus.last_policy(),
        Some(OwnershipPolicy::PrimaryAllowReplacement)
    );

    // Providers started in registration order, all on the same endpoint.
    let started = log.lock().unwrap();
    let ids: Vec<usize> = started.iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    let endpoint = mux.endpoint().expect("endpoint after start");
    for (_, ep) in started.iter() {
        assert!(Arc::ptr_eq(ep, endpoint));
    }

    // start() returned without waiting for the claim result.
    assert!(mux.started());
    assert_eq!(mux.ownership_status(), ClaimStatus::Pending);
}

#[test]
fn start_is_idempotent() {
    let bus = Arc::new(TestBus::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mux = mux_over(&bus);

    mux.register_service_provider(Box::new(RecordingProvider {
        id: 1,
        log: Arc::clone(&log),
    }))
    .expect("register");

    mux.start().expect("first start");
    mux.start().expect("second start");

    assert_eq!(bus.request_count(), 1);
    assert_eq!(bus.export_calls.load(Ordering::Relaxed), 1);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn register_after_start_is_refused() {
    let bus = Arc::new(TestBus::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mux = mux_over(&bus);

    mux.register_service_provider(Box::new(RecordingProvider {
        id: 1,
        log: Arc::clone(&log),
    }))
    .expect("register");
    mux.start().expect("start");

    let late = RecordingProvider {
        id: 99,
        log: Arc::clone(&log),
    };
    assert_eq!(
        mux.register_service_provider(Box::new(late)),
        Err(MuxError::AlreadyStarted)
    );

    // The late provider is never started, not even by another start call.
    mux.start().expect("restart");
    let ids: Vec<usize> = log.lock().unwrap().iter().map(|(id, _)| *id).collect();
    assert_eq!(ids, vec![1]);
}

// ===========================================================================
// Thread affinity
// ===========================================================================

#[test]
fn mutating_calls_from_foreign_thread_are_rejected() {
    let bus = Arc::new(TestBus::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mux = mux_over(&bus);

    thread::scope(|s| {
        s.spawn(|| {
            let err = mux
                .register_service_provider(Box::new(RecordingProvider {
                    id: 1,
                    log: Arc::clone(&log),
                }))
                .expect_err("register must be rejected off the origin thread");
            assert!(matches!(err, MuxError::WrongThread { .. }));

            let err = mux.start().expect_err("start must be rejected too");
            assert!(matches!(err, MuxError::WrongThread { .. }));
        });
    });

    // Nothing happened: no claim, no provider start, not started.
    assert_eq!(bus.request_count(), 0);
    assert!(log.lock().unwrap().is_empty());
    assert!(!mux.started());
}

// ===========================================================================
// Ownership result handling
// ===========================================================================

#[test]
fn claim_refusal_is_fatal_and_not_retried() {
    let bus = Arc::new(TestBus::default());
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mux = mux_over(&bus);

    mux.register_service_provider(Box::new(RecordingProvider {
        id: 1,
        log: Arc::clone(&log),
    }))
    .expect("register");
    mux.start().expect("start");

    bus.deliver_last(false);

    assert_eq!(mux.ownership_status(), ClaimStatus::Refused);
    // No retry, no provider restart.
    assert_eq!(bus.request_count(), 1);
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn only_the_first_claim_result_counts() {
    let bus = Arc::new(TestBus::default());
    let mut mux = mux_over(&bus);
    mux.start().expect("start");

    bus.deliver_last(true);
    bus.deliver_last(false); // duplicate delivery must be ignored

    assert_eq!(mux.ownership_status(), ClaimStatus::Granted);
}

#[test]
fn claim_result_may_arrive_from_another_thread() {
    let bus = Arc::new(TestBus::default());
    let mut mux = mux_over(&bus);
    mux.start().expect("start");

    let bus2 = Arc::clone(&bus);
    thread::spawn(move || bus2.deliver_last(true))
        .join()
        .expect("delivery thread");

    assert_eq!(mux.ownership_status(), ClaimStatus::Granted);
}

// ===========================================================================
// Teardown
// ===========================================================================

#[test]
fn providers_are_dropped_in_registration_order() {
    let bus = Arc::new(TestBus::default());
    let drops = Arc::new(Mutex::new(Vec::new()));
    let mut mux = mux_over(&bus);

    for id in 1..=3 {
        mux.register_service_provider(Box::new(DropProbe {
            id,
            drops: Arc::clone(&drops),
        }))
        .expect("register");
    }
    mux.start().expect("start");

    drop(mux);
    assert_eq!(*drops.lock().unwrap(), vec![1, 2, 3]);
}
