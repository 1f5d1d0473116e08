// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The provider capability contract, plus the built-in providers registered
// by the default initialization path.

use std::sync::{Arc, Weak};

use crate::bus::ExportedEndpoint;

// ---------------------------------------------------------------------------
// ServiceProvider
// ---------------------------------------------------------------------------

/// An independently implemented unit of exposed functionality.
///
/// Ownership transfers to the multiplexer at registration. `start` is
/// invoked exactly once, on the origin thread, after the ownership claim
/// has been issued and the shared endpoint exported; the provider attaches
/// its methods to `endpoint` during this call. Cleanup, if any, happens in
/// the provider's `Drop`.
pub trait ServiceProvider: Send {
    fn start(&mut self, endpoint: &Arc<ExportedEndpoint>);
}

// ---------------------------------------------------------------------------
// LivenessProvider
// ---------------------------------------------------------------------------

/// Answers `Liveness.CheckLiveness` with the owning process id, so a
/// watchdog can tell a responsive service from a wedged one still holding
/// the name.
pub struct LivenessProvider;

impl ServiceProvider for LivenessProvider {
    fn start(&mut self, endpoint: &Arc<ExportedEndpoint>) {
        endpoint.export_method(
            "Liveness",
            "CheckLiveness",
            Box::new(|_payload| Ok(std::process::id().to_string().into_bytes())),
        );
    }
}

// ---------------------------------------------------------------------------
// IntrospectionProvider
// ---------------------------------------------------------------------------

/// Answers `Introspection.ListMethods` with the endpoint's current method
/// list, one `Interface.Method` key per line.
pub struct IntrospectionProvider;

impl ServiceProvider for IntrospectionProvider {
    fn start(&mut self, endpoint: &Arc<ExportedEndpoint>) {
        // Weak back-reference: the endpoint owns this handler, so a strong
        // Arc here would never be freed.
        let weak: Weak<ExportedEndpoint> = Arc::downgrade(endpoint);
        endpoint.export_method(
            "Introspection",
            "ListMethods",
            Box::new(move |_payload| {
                let names = match weak.upgrade() {
                    Some(ep) => ep.method_names().join("\n"),
                    None => String::new(),
                };
                Ok(names.into_bytes())
            }),
        );
    }
}
