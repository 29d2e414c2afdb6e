//! Host-port allocation.
//!
//! A liveness probe against the network stack is not enough on its own:
//! between probing a port and the container actually binding it, a
//! concurrent request can observe the same "free" port. The allocator
//! therefore keeps an in-process reservation set and holds its mutex
//! across the whole claim — consult the set, probe only unreserved
//! ports, record the winner — so two pipelines can never walk away with
//! the same port.
//!
//! Reservations are released on rollback, on teardown, or when the
//! external bind is confirmed to have failed. At daemon startup the set
//! is reseeded from the registry's live instances.

use std::collections::BTreeSet;
use std::net::TcpListener;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Reservation-set port allocator over the range `[start, end)`.
pub struct PortAllocator {
    start: u16,
    end: u16,
    reserved: Mutex<BTreeSet<u16>>,
    probe: Box<dyn Fn(u16) -> bool + Send + Sync>,
}

impl PortAllocator {
    /// Allocator with the default TCP-bind liveness probe.
    pub fn new(start: u16, end: u16) -> Self {
        Self::with_probe(start, end, tcp_port_free)
    }

    /// Allocator with a custom liveness probe (tests, alternate stacks).
    pub fn with_probe(
        start: u16,
        end: u16,
        probe: impl Fn(u16) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            start,
            end,
            reserved: Mutex::new(BTreeSet::new()),
            probe: Box::new(probe),
        }
    }

    /// Mark ports as already claimed (registry reseeding at startup).
    pub fn reserve_existing(&self, ports: impl IntoIterator<Item = u16>) {
        let mut reserved = self.reserved.lock().expect("port reservations lock");
        for port in ports {
            reserved.insert(port);
        }
    }

    /// Reserve the lowest free port in the range.
    ///
    /// The reservation set is consulted before any probe and the mutex
    /// is held until the winner is recorded, so concurrent calls are
    /// fully serialized.
    pub fn allocate(&self) -> OrchestratorResult<u16> {
        let mut reserved = self.reserved.lock().expect("port reservations lock");
        for port in self.start..self.end {
            if reserved.contains(&port) {
                continue;
            }
            if !(self.probe)(port) {
                debug!(port, "port externally busy, skipping");
                continue;
            }
            reserved.insert(port);
            debug!(port, "port reserved");
            return Ok(port);
        }
        Err(OrchestratorError::PortsExhausted)
    }

    /// Return a port to the free set.
    pub fn release(&self, port: u16) {
        let mut reserved = self.reserved.lock().expect("port reservations lock");
        if reserved.remove(&port) {
            debug!(port, "port released");
        }
    }

    /// Number of currently reserved ports (diagnostics).
    pub fn reserved_count(&self) -> usize {
        self.reserved.lock().expect("port reservations lock").len()
    }
}

/// Default probe: a port is free if we can momentarily bind it.
fn tcp_port_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}
