// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Usage:
//   demo_service
//
// Minimal embedding of the service bus: initialize the process-wide
// instance, poke the built-in providers through the exported endpoint,
// and shut down. Run with RUST_LOG=debug to watch the ownership claim.

use busmux::lifecycle;

fn main() {
    env_logger::init();

    lifecycle::initialize();

    match lifecycle::exported_endpoint() {
        Some(endpoint) => {
            println!("service bus up at {}", endpoint.path());

            match endpoint.dispatch("Liveness", "CheckLiveness", &[]) {
                Ok(reply) => println!("liveness: pid {}", String::from_utf8_lossy(&reply)),
                Err(e) => eprintln!("liveness check failed: {e}"),
            }

            match endpoint.dispatch("Introspection", "ListMethods", &[]) {
                Ok(reply) => {
                    println!("exported methods:");
                    for line in String::from_utf8_lossy(&reply).lines() {
                        println!("  {line}");
                    }
                }
                Err(e) => eprintln!("introspection failed: {e}"),
            }
        }
        None => println!("no live bus here; running the inert stand-in"),
    }

    lifecycle::shutdown();
}
