// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The service bus multiplexer: claims one well-known name on the bus,
// exports one shared endpoint, and starts every registered provider
// against it.
//
// All mutation is confined to the thread the multiplexer was constructed
// on. The only thing that escapes that confinement is the ownership-claim
// result, which the connection may deliver on any thread; it lands in a
// one-shot atomic cell where the first delivery wins.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use thiserror::Error;

use crate::bus::{BusConnection, ExportedEndpoint, OwnershipPolicy};
use crate::provider::ServiceProvider;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Contract violations on the multiplexer's mutating entry points.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MuxError {
    /// A mutating call arrived on a thread other than the origin thread.
    #[error("mutating call from {current:?}; multiplexer is bound to {origin:?}")]
    WrongThread { origin: ThreadId, current: ThreadId },
    /// A provider was registered after the service was already started.
    #[error("provider registered after the service was started")]
    AlreadyStarted,
}

// ---------------------------------------------------------------------------
// Claim state
// ---------------------------------------------------------------------------

/// Observed state of the ownership claim issued by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    /// No result delivered yet (or `start` not called).
    Pending,
    /// The bus granted primary ownership.
    Granted,
    /// The bus refused the name. Fatal for this endpoint: without a claimed
    /// name nothing can reach it. Not retried.
    Refused,
}

const CLAIM_PENDING: u8 = 0;
const CLAIM_GRANTED: u8 = 1;
const CLAIM_REFUSED: u8 = 2;

/// One-shot cell for the asynchronous claim result. The connection may
/// invoke the callback from any thread; only the first delivery is acted
/// on.
struct ClaimState(AtomicU8);

impl ClaimState {
    fn new() -> Self {
        Self(AtomicU8::new(CLAIM_PENDING))
    }

    fn settle(&self, name: &str, granted: bool) {
        let next = if granted { CLAIM_GRANTED } else { CLAIM_REFUSED };
        match self
            .0
            .compare_exchange(CLAIM_PENDING, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                if granted {
                    log::debug!("now primary owner of {name}");
                } else {
                    log::error!(
                        "failed to own {name}: the multiplexed endpoint cannot serve requests"
                    );
                }
            }
            Err(_) => log::warn!("duplicate ownership result for {name} ignored"),
        }
    }

    fn status(&self) -> ClaimStatus {
        match self.0.load(Ordering::Acquire) {
            CLAIM_GRANTED => ClaimStatus::Granted,
            CLAIM_REFUSED => ClaimStatus::Refused,
            _ => ClaimStatus::Pending,
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceMultiplexer
// ---------------------------------------------------------------------------

/// Owns one well-known bus name and aggregates N providers behind the
/// endpoint exported at a fixed path.
///
/// Construction captures the calling thread as the origin thread; every
/// mutating entry point checks it and refuses calls from anywhere else.
/// Providers are owned exclusively and dropped in registration order.
pub struct ServiceMultiplexer {
    service_name: String,
    endpoint_path: String,
    origin_thread: ThreadId,
    started: bool,
    // Declared before `conn` so providers are dropped before the
    // connection handle is released.
    providers: Vec<Box<dyn ServiceProvider>>,
    endpoint: Option<Arc<ExportedEndpoint>>,
    claim: Arc<ClaimState>,
    conn: Arc<dyn BusConnection>,
}

impl ServiceMultiplexer {
    /// Bind a multiplexer to `conn`, claiming `service_name` and exporting
    /// at `endpoint_path` once started. The calling thread becomes the
    /// origin thread.
    pub fn new(conn: Arc<dyn BusConnection>, service_name: &str, endpoint_path: &str) -> Self {
        Self {
            service_name: service_name.to_owned(),
            endpoint_path: endpoint_path.to_owned(),
            origin_thread: thread::current().id(),
            started: false,
            providers: Vec::new(),
            endpoint: None,
            claim: Arc::new(ClaimState::new()),
            conn,
        }
    }

    /// Register a provider. Origin thread only, and only before `start`
    /// has succeeded; a provider accepted after start would never be
    /// started, so the call is refused instead.
    pub fn register_service_provider(
        &mut self,
        provider: Box<dyn ServiceProvider>,
    ) -> Result<(), MuxError> {
        self.check_origin_thread()?;
        if self.started {
            log::error!(
                "provider registered on {} after start; refusing it",
                self.service_name
            );
            return Err(MuxError::AlreadyStarted);
        }
        self.providers.push(provider);
        Ok(())
    }

    /// Start the service. Origin thread only. Idempotent: once started,
    /// further calls return immediately with no effect.
    ///
    /// Issues the asynchronous ownership claim, synchronously exports the
    /// shared endpoint, then starts every provider in registration order.
    /// Returns before the claim result arrives.
    pub fn start(&mut self) -> Result<(), MuxError> {
        self.check_origin_thread()?;
        if self.started {
            return Ok(());
        }

        // A previous instance of this process can wind up wedged in an
        // unkillable state while still holding the name across a restart.
        // The claim must be allowed to evict such an owner, or startup
        // deadlocks on a corpse.
        let claim = Arc::clone(&self.claim);
        self.conn.request_ownership(
            &self.service_name,
            OwnershipPolicy::PrimaryAllowReplacement,
            Box::new(move |name, granted| claim.settle(name, granted)),
        );

        let endpoint = self.conn.exported_endpoint(&self.endpoint_path);
        for provider in &mut self.providers {
            provider.start(&endpoint);
        }
        self.endpoint = Some(endpoint);
        self.started = true;

        log::debug!(
            "service {} started with {} providers at {}",
            self.service_name,
            self.providers.len(),
            self.endpoint_path
        );
        Ok(())
    }

    /// Whether `start` has completed.
    pub fn started(&self) -> bool {
        self.started
    }

    /// The shared endpoint. `Some` exactly when started.
    pub fn endpoint(&self) -> Option<&Arc<ExportedEndpoint>> {
        self.endpoint.as_ref()
    }

    /// Observed state of the ownership claim.
    pub fn ownership_status(&self) -> ClaimStatus {
        self.claim.status()
    }

    /// The well-known name this multiplexer claims.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Number of registered providers.
    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    fn check_origin_thread(&self) -> Result<(), MuxError> {
        let current = thread::current().id();
        if current != self.origin_thread {
            log::error!(
                "service multiplexer for {} touched from {current:?}; bound to {:?}",
                self.service_name,
                self.origin_thread
            );
            return Err(MuxError::WrongThread {
                origin: self.origin_thread,
                current,
            });
        }
        Ok(())
    }
}
