//! The four kinds of object a monitor can watch, and the per-item state a
//! monitor keeps for each one.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::ipc::{Endpoint, ServerChannel};

/// Event bits a caller can ask a monitor to report.
pub mod signal {
    pub const READABLE: u32 = 1 << 0;
    pub const WRITABLE: u32 = 1 << 1;
    pub const CLOSED: u32 = 1 << 2;
    pub const CLIENT_ARRIVED: u32 = 1 << 3;
    pub const FUTEX_CHANGED: u32 = 1 << 4;
    pub const TIMER_FIRED: u32 = 1 << 5;
}

/// What a monitor item watches.
pub enum ItemKind {
    /// Level-triggered on `READABLE`/`WRITABLE`/`CLOSED`.
    Channel(Arc<Endpoint>),
    /// Level-triggered on `CLIENT_ARRIVED`.
    ServerChannel(Arc<ServerChannel>),
    /// Edge-triggered, active-high: fires once per transition away from
    /// `expected`, comparison performed with the same ordering a futex
    /// wait/wake pair uses.
    Futex {
        cell: Arc<AtomicU32>,
        expected: u32,
    },
    /// A one-shot deferred work item. `fire_at` is compared against the
    /// monitor's own tick source at poll time; cancellation and firing are
    /// serialized by the monitor's item-list lock, since both can race
    /// right up until the tick that would fire it.
    Timeout {
        fire_at: u64,
        cancelled: Arc<core::sync::atomic::AtomicBool>,
    },
}

impl ItemKind {
    /// Current level: whether the watched condition holds right now,
    /// independent of whether it has already been reported.
    pub fn level(&self, now: u64) -> (bool, u32) {
        match self {
            ItemKind::Channel(endpoint) => {
                let mut bits = 0;
                if endpoint.pending() > 0 {
                    bits |= signal::READABLE;
                }
                if !endpoint.peer_closed() {
                    bits |= signal::WRITABLE;
                }
                if endpoint.peer_closed() {
                    bits |= signal::CLOSED;
                }
                (bits != 0, bits)
            }
            ItemKind::ServerChannel(server) => {
                let ready = server.pending_count() > 0;
                (ready, if ready { signal::CLIENT_ARRIVED } else { 0 })
            }
            ItemKind::Futex { cell, expected } => {
                let changed = cell.load(Ordering::SeqCst) != *expected;
                (changed, if changed { signal::FUTEX_CHANGED } else { 0 })
            }
            ItemKind::Timeout { fire_at, cancelled } => {
                let fired = !cancelled.load(Ordering::Acquire) && now >= *fire_at;
                (fired, if fired { signal::TIMER_FIRED } else { 0 })
            }
        }
    }

    /// Items with no natural level to re-poll (a one-shot timeout, or a
    /// futex cell whose "expected" value was already consumed) only make
    /// sense edge-triggered; this is the default an item of this kind gets
    /// unless the caller asks for something else, not a hard rule -- any
    /// kind can be registered edge- or level-triggered explicitly through
    /// [`MonitorItem`]'s own field.
    pub fn default_edge_triggered(&self) -> bool {
        matches!(self, ItemKind::Futex { .. } | ItemKind::Timeout { .. })
    }
}

/// A single watched object plus the bookkeeping a monitor needs to decide
/// whether to report it on the next poll.
pub struct MonitorItem {
    pub key: u64,
    pub kind: ItemKind,
    pub mask: u32,
    pub enabled: bool,
    pub last_active: bool,
    /// Whether this item reports only on transition into the active state
    /// (edge) or on every poll while active (level). A per-item property,
    /// not implied by `kind` -- a channel item can be registered
    /// edge-triggered just as a futex item can be level-triggered.
    pub edge_triggered: bool,
    /// Cleared automatically the next time this item is reported, the way
    /// `EPOLLONESHOT` works: the item stays registered but stops being
    /// polled until a later `update` re-enables it.
    pub disable_on_trigger: bool,
    /// Removed automatically the next time this item is reported, instead
    /// of needing an explicit `Delete` from the caller.
    pub delete_on_trigger: bool,
    /// Opaque caller-set bit, untouched by the monitor itself; lets a
    /// caller distinguish "I've already handled this report" from "still
    /// pending" without a side table keyed by `key`.
    pub user_flag: bool,
    /// Set once this item has been removed by `update` but not yet
    /// surfaced through a `poll` call -- the dead-but-unpolled region of
    /// the monitor's item list.
    pub pending_delete: bool,
}

impl MonitorItem {
    pub fn new(key: u64, kind: ItemKind, mask: u32) -> Self {
        let edge_triggered = kind.default_edge_triggered();
        Self {
            key,
            kind,
            mask,
            enabled: true,
            last_active: false,
            edge_triggered,
            disable_on_trigger: false,
            delete_on_trigger: false,
            user_flag: false,
            pending_delete: false,
        }
    }

    pub fn set_user_flag(&mut self, value: bool) {
        self.user_flag = value;
    }
}
