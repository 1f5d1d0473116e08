// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Process-wide lifecycle for the service bus multiplexer.
//
// The embedding process calls `initialize` at startup and `shutdown` at
// exit; everything in between goes through the one instance held here.
// Environments without a usable bus get an inert stand-in with the same
// external shape, so dependent code runs unmodified (and simply gets no
// answers).

use std::sync::{Arc, Mutex};

use crate::bus::{BusConnection, ExportedEndpoint};
use crate::multiplexer::ServiceMultiplexer;
use crate::provider::{IntrospectionProvider, LivenessProvider, ServiceProvider};
use crate::shm_bus::ShmBusConnection;

// ---------------------------------------------------------------------------
// Fixed configuration
// ---------------------------------------------------------------------------

/// The well-known name this process claims on the bus.
pub const SERVICE_NAME: &str = "org.busmux.Service";

/// The path the shared endpoint is exported at.
pub const ENDPOINT_PATH: &str = "/org/busmux/Service";

/// The default bus domain (names one shared registry segment).
pub const BUS_DOMAIN: &str = "busmux";

// ---------------------------------------------------------------------------
// Singleton
// ---------------------------------------------------------------------------

/// The one instance: a live multiplexer, or the inert stand-in installed
/// when no bus is available.
enum Instance {
    Real(ServiceMultiplexer),
    Stub,
}

static INSTANCE: Mutex<Option<Instance>> = Mutex::new(None);

/// Initialize the service bus for this process.
///
/// If a live bus is obtainable on this platform, constructs a multiplexer
/// over it, registers the built-in providers, and starts it. Otherwise
/// installs the stand-in. Calling again while initialized is a logged
/// no-op; the existing instance stays authoritative.
pub fn initialize() {
    let mut instance = INSTANCE.lock().unwrap();
    if instance.is_some() {
        log::warn!("service bus was already initialized");
        return;
    }
    *instance = Some(default_instance());
    log::debug!("service bus initialized");
}

/// Initialize over an explicit connection with exactly one provider,
/// bypassing environment detection. For deterministic tests.
pub fn initialize_for_testing(conn: Arc<dyn BusConnection>, provider: Box<dyn ServiceProvider>) {
    let mut instance = INSTANCE.lock().unwrap();
    if instance.is_some() {
        log::warn!("service bus was already initialized");
        return;
    }
    let mut mux = ServiceMultiplexer::new(conn, SERVICE_NAME, ENDPOINT_PATH);
    register_or_log(&mut mux, provider);
    if let Err(e) = mux.start() {
        log::error!("service bus failed to start: {e}");
    }
    *instance = Some(Instance::Real(mux));
    log::debug!("service bus initialized");
}

/// Tear down the current instance and reset to uninitialized. Providers
/// are dropped in registration order. Defined only after a successful
/// `initialize`; calling it uninitialized is reported and ignored.
pub fn shutdown() {
    let mut instance = INSTANCE.lock().unwrap();
    if instance.take().is_none() {
        log::error!("service bus shutdown without a prior initialize");
        return;
    }
    log::debug!("service bus shutdown completed");
}

/// Whether an instance (real or stand-in) is currently installed.
pub fn is_initialized() -> bool {
    INSTANCE.lock().unwrap().is_some()
}

/// The shared endpoint of the running instance. `None` when uninitialized,
/// not yet started, or running the stand-in.
pub fn exported_endpoint() -> Option<Arc<ExportedEndpoint>> {
    let instance = INSTANCE.lock().unwrap();
    match instance.as_ref() {
        Some(Instance::Real(mux)) => mux.endpoint().cloned(),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Environment probe
// ---------------------------------------------------------------------------

fn default_instance() -> Instance {
    if !cfg!(any(unix, windows)) {
        log::debug!("no shared-memory bus on this platform; installing stand-in");
        return Instance::Stub;
    }
    match ShmBusConnection::open(BUS_DOMAIN) {
        Ok(conn) => {
            let conn: Arc<dyn BusConnection> = Arc::new(conn);
            let mut mux = ServiceMultiplexer::new(conn, SERVICE_NAME, ENDPOINT_PATH);
            register_or_log(&mut mux, Box::new(LivenessProvider));
            register_or_log(&mut mux, Box::new(IntrospectionProvider));
            if let Err(e) = mux.start() {
                log::error!("service bus failed to start: {e}");
            }
            Instance::Real(mux)
        }
        Err(e) => {
            log::warn!("no live bus available ({e}); installing stand-in");
            Instance::Stub
        }
    }
}

fn register_or_log(mux: &mut ServiceMultiplexer, provider: Box<dyn ServiceProvider>) {
    if let Err(e) = mux.register_service_provider(provider) {
        log::error!("provider registration refused: {e}");
    }
}
