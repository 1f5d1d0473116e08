// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Tests for the shared-memory bus connection and the exported endpoint.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use busmux::{BusConnection, OwnershipPolicy, ShmBusConnection};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_domain(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_bus_{n}_{}", std::process::id())
}

fn claim_and_wait(conn: &ShmBusConnection, name: &str) -> bool {
    let (tx, rx) = mpsc::channel();
    conn.request_ownership(
        name,
        OwnershipPolicy::PrimaryAllowReplacement,
        Box::new(move |_name, granted| {
            let _ = tx.send(granted);
        }),
    );
    rx.recv_timeout(Duration::from_secs(5)).expect("claim result")
}

// ===========================================================================
// Ownership requests
// ===========================================================================

#[test]
fn ownership_claim_is_granted_and_visible_to_peers() {
    let domain = unique_domain("grant");
    let conn = ShmBusConnection::open(&domain).expect("open");

    assert!(claim_and_wait(&conn, "org.test.Owner"));

    let entry = conn
        .registry()
        .owner_of("org.test.Owner")
        .expect("owner entry");
    assert_eq!(entry.pid, std::process::id() as i32);
}

#[test]
fn ownership_result_arrives_off_the_calling_thread() {
    let domain = unique_domain("offthread");
    let conn = ShmBusConnection::open(&domain).expect("open");

    let origin = thread::current().id();
    let (tx, rx) = mpsc::channel();
    conn.request_ownership(
        "org.test.Async",
        OwnershipPolicy::PrimaryAllowReplacement,
        Box::new(move |_name, granted| {
            let _ = tx.send((granted, thread::current().id() != origin));
        }),
    );

    let (granted, off_thread) = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("claim result");
    assert!(granted);
    assert!(off_thread, "result callback ran on the requesting thread");
}

#[test]
fn claimed_names_are_released_when_the_connection_drops() {
    let domain = unique_domain("release");
    let holder = ShmBusConnection::open(&domain).expect("open holder");
    let watcher = ShmBusConnection::open(&domain).expect("open watcher");

    assert!(claim_and_wait(&holder, "org.test.Transient"));
    assert!(watcher.registry().owner_of("org.test.Transient").is_some());

    drop(holder);
    assert!(watcher.registry().owner_of("org.test.Transient").is_none());
}

// ===========================================================================
// Exported endpoints
// ===========================================================================

#[test]
fn endpoint_export_is_idempotent_per_path() {
    let domain = unique_domain("endpoint");
    let conn = ShmBusConnection::open(&domain).expect("open");

    let a = conn.exported_endpoint("/org/test/Obj");
    let b = conn.exported_endpoint("/org/test/Obj");
    let other = conn.exported_endpoint("/org/test/Other");

    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert!(!std::sync::Arc::ptr_eq(&a, &other));
    assert_eq!(a.path(), "/org/test/Obj");
}

#[test]
fn endpoint_dispatch_reaches_exported_methods() {
    let domain = unique_domain("dispatch");
    let conn = ShmBusConnection::open(&domain).expect("open");
    let endpoint = conn.exported_endpoint("/org/test/Obj");

    assert!(endpoint.export_method(
        "Echo",
        "Reverse",
        Box::new(|payload| {
            let mut out = payload.to_vec();
            out.reverse();
            Ok(out)
        })
    ));
    assert!(endpoint.has_method("Echo", "Reverse"));

    let reply = endpoint.dispatch("Echo", "Reverse", b"abc").expect("dispatch");
    assert_eq!(reply, b"cba");
}

#[test]
fn duplicate_method_export_is_refused() {
    let domain = unique_domain("dup");
    let conn = ShmBusConnection::open(&domain).expect("open");
    let endpoint = conn.exported_endpoint("/org/test/Obj");

    assert!(endpoint.export_method("A", "M", Box::new(|_| Ok(vec![1]))));
    assert!(!endpoint.export_method("A", "M", Box::new(|_| Ok(vec![2]))));

    // The first handler stays in place.
    assert_eq!(endpoint.dispatch("A", "M", &[]).expect("dispatch"), vec![1]);
}

#[test]
fn unknown_method_reports_not_found() {
    let domain = unique_domain("missing");
    let conn = ShmBusConnection::open(&domain).expect("open");
    let endpoint = conn.exported_endpoint("/org/test/Obj");

    let err = endpoint
        .dispatch("No", "Such", &[])
        .expect_err("missing method");
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
}

#[test]
fn method_names_are_listed_sorted() {
    let domain = unique_domain("names");
    let conn = ShmBusConnection::open(&domain).expect("open");
    let endpoint = conn.exported_endpoint("/org/test/Obj");

    endpoint.export_method("B", "Two", Box::new(|_| Ok(Vec::new())));
    endpoint.export_method("A", "One", Box::new(|_| Ok(Vec::new())));

    assert_eq!(endpoint.method_names(), vec!["A.One", "B.Two"]);
}
