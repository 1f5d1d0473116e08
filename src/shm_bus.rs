// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// BusConnection backed by the shared-memory name registry.
//
// Ownership requests run on a short-lived helper thread, so the result
// callback fires off the caller's thread the same way a real bus daemon
// would deliver it. Names claimed through a connection are released when
// the connection drops; names held by a process that dies without
// releasing are evicted by the registry's liveness probe.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;

use crate::bus::{BusConnection, ExportedEndpoint, OwnershipCallback, OwnershipPolicy};
use crate::registry::NameRegistry;

pub struct ShmBusConnection {
    registry: Arc<NameRegistry>,
    endpoints: Mutex<HashMap<String, Arc<ExportedEndpoint>>>,
    /// Names successfully claimed through this connection.
    owned: Arc<Mutex<Vec<String>>>,
}

impl ShmBusConnection {
    /// Connect to the bus domain `domain`, creating it if this is the
    /// first process to touch it.
    pub fn open(domain: &str) -> io::Result<Self> {
        let registry = NameRegistry::open(domain)?;
        Ok(Self {
            registry: Arc::new(registry),
            endpoints: Mutex::new(HashMap::new()),
            owned: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The underlying claim table (peers use this for discovery).
    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }
}

impl BusConnection for ShmBusConnection {
    fn request_ownership(&self, name: &str, policy: OwnershipPolicy, on_result: OwnershipCallback) {
        let registry = Arc::clone(&self.registry);
        let owned = Arc::clone(&self.owned);
        let name = name.to_owned();
        thread::spawn(move || {
            // Sweep corpses first so a claim against a dead owner reads as
            // a plain acquisition, not a replacement.
            registry.gc();
            let outcome = registry.claim(&name, policy);
            log::debug!("ownership claim for {name}: {outcome:?}");
            let granted = outcome.granted();
            if granted {
                owned.lock().unwrap().push(name.clone());
            }
            on_result(&name, granted);
        });
    }

    fn exported_endpoint(&self, path: &str) -> Arc<ExportedEndpoint> {
        let mut endpoints = self.endpoints.lock().unwrap();
        Arc::clone(
            endpoints
                .entry(path.to_owned())
                .or_insert_with(|| Arc::new(ExportedEndpoint::new(path))),
        )
    }
}

impl Drop for ShmBusConnection {
    fn drop(&mut self) {
        let owned = self.owned.lock().unwrap();
        for name in owned.iter() {
            self.registry.release(name);
        }
    }
}
