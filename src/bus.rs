// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The bus-connection contract consumed by the multiplexer, and the shared
// exported endpoint that providers attach their methods to.
//
// Payloads are opaque byte slices: the wire format belongs to whatever
// transport drives `ExportedEndpoint::dispatch`, not to this crate.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// Ownership policy
// ---------------------------------------------------------------------------

/// How a name-ownership request treats an existing owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipPolicy {
    /// Fail if a live owner already holds the name.
    Default,
    /// Become the primary owner, evicting a prior owner that opted into
    /// replacement, and permit being evicted the same way later.
    PrimaryAllowReplacement,
}

/// Completion callback for an ownership request.
///
/// Receives the requested name and whether the claim was granted. May be
/// invoked from a thread other than the caller's. The bus is expected to
/// deliver exactly once, but receivers treat it as first-delivery-wins.
pub type OwnershipCallback = Box<dyn Fn(&str, bool) + Send>;

// ---------------------------------------------------------------------------
// BusConnection
// ---------------------------------------------------------------------------

/// A connection to the message bus.
///
/// The connection is shared for the process lifetime and outlives every
/// multiplexer bound to it; the multiplexer never tears it down.
pub trait BusConnection: Send + Sync {
    /// Asynchronously request ownership of `name`.
    ///
    /// `on_result` fires at most once, possibly on a different thread,
    /// possibly after the caller has moved on.
    fn request_ownership(&self, name: &str, policy: OwnershipPolicy, on_result: OwnershipCallback);

    /// The exported endpoint at `path`. Synchronous and idempotent per
    /// path: repeated calls return the same endpoint object.
    fn exported_endpoint(&self, path: &str) -> Arc<ExportedEndpoint>;
}

// ---------------------------------------------------------------------------
// ExportedEndpoint
// ---------------------------------------------------------------------------

/// Handler for one exported method: opaque request bytes in, reply bytes out.
pub type MethodHandler = Box<dyn Fn(&[u8]) -> io::Result<Vec<u8>> + Send + Sync>;

/// The shared object all providers export their methods onto.
///
/// Methods are keyed `"Interface.Method"`. Export happens on the origin
/// thread during provider startup; dispatch may come from any thread the
/// transport uses, so the table is behind a mutex.
pub struct ExportedEndpoint {
    path: String,
    methods: Mutex<HashMap<String, MethodHandler>>,
}

impl ExportedEndpoint {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_owned(),
            methods: Mutex::new(HashMap::new()),
        }
    }

    /// The path this endpoint is exported at.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attach a method handler. Returns `false` (and leaves the existing
    /// handler in place) if `interface.method` is already exported.
    pub fn export_method(&self, interface: &str, method: &str, handler: MethodHandler) -> bool {
        let key = format!("{interface}.{method}");
        let mut methods = self.methods.lock().unwrap();
        if methods.contains_key(&key) {
            log::warn!("method {key} already exported on {}", self.path);
            return false;
        }
        log::debug!("exported {key} on {}", self.path);
        methods.insert(key, handler);
        true
    }

    /// Invoke an exported method. Unknown methods report `NotFound`.
    pub fn dispatch(&self, interface: &str, method: &str, payload: &[u8]) -> io::Result<Vec<u8>> {
        let key = format!("{interface}.{method}");
        let methods = self.methods.lock().unwrap();
        match methods.get(&key) {
            Some(handler) => handler(payload),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no method {key} on {}", self.path),
            )),
        }
    }

    pub fn has_method(&self, interface: &str, method: &str) -> bool {
        let key = format!("{interface}.{method}");
        self.methods.lock().unwrap().contains_key(&key)
    }

    /// All exported method keys, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}
