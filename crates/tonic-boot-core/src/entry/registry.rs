//! Ordered ownership of every [`Entry`] in the process.
//!
//! The [`EntryRegistry`] is populated once at startup, then drives the
//! lifecycle of its entries:
//!
//! - [`bootstrap_all`](EntryRegistry::bootstrap_all) starts entries in
//!   declaration order and fails fast on the first error.
//! - [`wait_for_shutdown_signal`](EntryRegistry::wait_for_shutdown_signal)
//!   blocks until Ctrl+C, `SIGTERM` or a [`ShutdownHandle::trigger`].
//! - [`interrupt_all`](EntryRegistry::interrupt_all) stops entries in reverse
//!   declaration order. Every entry is attempted; failures are collected into
//!   a single [`Error::Shutdown`].
//!
//! The registry is the only writer of each entry's [`EntryState`].

use super::{Entry, EntryState};
use crate::{Error, Result};
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

struct Slot {
    entry: Arc<dyn Entry>,
    state: Mutex<EntryState>,
}

/// Table of entries keyed by name, in declaration order.
pub struct EntryRegistry {
    slots: Vec<Slot>,
    shutdown: CancellationToken,
}

impl Default for EntryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryRegistry {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Adds an entry in the `Created` state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEntry`] if an entry with the same name is
    /// already registered. The existing entry is kept.
    pub fn register(&mut self, entry: Arc<dyn Entry>) -> Result<()> {
        if self.get(entry.name()).is_some() {
            return Err(Error::DuplicateEntry {
                name: entry.name().to_string(),
            });
        }
        tracing::debug!(entry = entry.name(), kind = entry.kind(), "Registered entry");
        self.slots.push(Slot {
            entry,
            state: Mutex::new(EntryState::Created),
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Entry>> {
        self.slot(name).map(|slot| Arc::clone(&slot.entry))
    }

    pub fn state(&self, name: &str) -> Option<EntryState> {
        self.slot(name).map(|slot| *slot.state.lock())
    }

    /// Entry names in declaration order.
    pub fn names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.entry.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|slot| slot.entry.name() == name)
    }

    /// Bootstraps every `Created` entry in declaration order. Entries that are
    /// already bootstrapped are skipped.
    ///
    /// # Errors
    ///
    /// Returns the first bootstrap error. Entries started before the failure
    /// keep serving; the caller decides whether to interrupt them.
    pub async fn bootstrap_all(&self) -> Result<()> {
        for slot in &self.slots {
            if *slot.state.lock() != EntryState::Created {
                continue;
            }

            let entry = &slot.entry;
            if let Err(e) = entry.bootstrap().await {
                tracing::error!(
                    entry = entry.name(),
                    kind = entry.kind(),
                    "Bootstrap failed: {e}"
                );
                return Err(e);
            }
            *slot.state.lock() = EntryState::Bootstrapped;
        }

        tracing::info!(entries = self.slots.len(), "All entries bootstrapped");
        Ok(())
    }

    /// Interrupts every entry in reverse declaration order.
    ///
    /// Entries that never bootstrapped are interrupted too, which is a no-op
    /// for them. A failed entry keeps its state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Shutdown`] listing every entry that failed.
    pub async fn interrupt_all(&self) -> Result<()> {
        let mut failures = Vec::new();

        for slot in self.slots.iter().rev() {
            let entry = &slot.entry;
            match entry.interrupt().await {
                Ok(()) => *slot.state.lock() = EntryState::Interrupted,
                Err(e) => {
                    tracing::error!(
                        entry = entry.name(),
                        kind = entry.kind(),
                        "Interrupt failed: {e}"
                    );
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            tracing::info!("All entries interrupted");
            Ok(())
        } else {
            Err(Error::Shutdown { failures })
        }
    }

    /// A handle that unblocks [`wait_for_shutdown_signal`](Self::wait_for_shutdown_signal).
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// Blocks until Ctrl+C, `SIGTERM` (on unix) or a
    /// [`ShutdownHandle::trigger`].
    pub async fn wait_for_shutdown_signal(&self) {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        };

        tokio::select! {
            () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
            () = terminate => tracing::info!("Received SIGTERM signal"),
            () = self.shutdown.cancelled() => tracing::info!("Shutdown triggered"),
        }
    }
}

impl fmt::Debug for EntryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for slot in &self.slots {
            map.entry(&slot.entry.name(), &*slot.state.lock());
        }
        map.finish()
    }
}

/// Synthetic shutdown trigger for a registry.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}
