//! The event multiplexer: one `Monitor` watches a batch of channels,
//! server channels, futexes, and timeouts, and reports which of them have
//! become active.
//!
//! The item list is split into a live region, `items[0..item_count]`, and
//! a dead-but-unpolled region, `items[item_count..]`, holding entries
//! `update` (or a trigger's own `delete_on_trigger`) has removed that
//! `poll` hasn't reported yet -- a caller that deletes an item still gets
//! exactly one more chance to see it flagged before it disappears.

pub mod item;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::error::{KernelError, Result};
use crate::process::descriptor::DescriptorObject;
use crate::sync::Semaphore;
pub use item::{signal, ItemKind, MonitorItem};

/// What kind of change a single entry in an `update` batch requests.
pub enum UpdateOp {
    /// Add a new item; fails with `AlreadyInProgress` under `strict_match`
    /// if `key` is already registered, otherwise behaves like `Update`.
    Create { kind: ItemKind, mask: u32 },
    /// Change the mask of an existing item.
    Update { mask: u32 },
    /// Remove an item, moving it into the dead-but-unpolled region.
    Delete,
}

pub struct UpdateRequest {
    pub key: u64,
    pub op: UpdateOp,
    /// Install the item (or leave it) disabled: present in the table but
    /// never reported until a later `Update` re-enables it.
    pub disable: bool,
    /// Require the key's current presence/absence to match what `op`
    /// expects, instead of silently falling back (`Create` on an existing
    /// key behaving like `Update`, `Delete`/`Update` on a missing key
    /// being a no-op).
    pub strict_match: bool,
    /// Override the item's triggering mode. `None` keeps whatever the item
    /// already has (its kind's default on `Create`, unchanged on `Update`).
    pub edge_triggered: Option<bool>,
    /// Disable the item the next time it is reported, instead of leaving
    /// it enabled for repeated level-triggered reports.
    pub disable_on_trigger: bool,
    /// Delete the item the next time it is reported.
    pub delete_on_trigger: bool,
}

impl UpdateRequest {
    /// The common case: enabled, level/edge mode left at the kind's
    /// default, no auto-disable or auto-delete.
    pub fn simple(key: u64, op: UpdateOp) -> Self {
        Self {
            key,
            op,
            disable: false,
            strict_match: false,
            edge_triggered: None,
            disable_on_trigger: false,
            delete_on_trigger: false,
        }
    }
}

/// One item reported back from `poll`.
#[derive(Debug, Clone, Copy)]
pub struct TriggeredItem {
    pub key: u64,
    pub bits: u32,
    /// Set if this report is the item's last: it was deleted (explicitly
    /// by an `update` call, or automatically via `delete_on_trigger`) and
    /// is now being removed from the table.
    pub deleted: bool,
}

#[derive(Clone, Copy)]
pub enum PollTimeout {
    /// Block until at least one item is active.
    Forever,
    /// Return immediately with whatever is active right now, if anything.
    Zero,
}

struct State {
    items: Vec<MonitorItem>,
    item_count: usize,
}

/// An event multiplexer instance, installed in a process's descriptor
/// table like a channel or server channel.
pub struct Monitor {
    state: Mutex<State>,
    closed: AtomicBool,
    outstanding_polls: AtomicUsize,
    /// Bumped by `update` (conservatively, whenever a change could make an
    /// item reportable) and by `close`; `poll(Forever)` blocks on this
    /// instead of an unconditional spin once it has confirmed nothing is
    /// ready right now.
    triggered: Semaphore,
}

impl DescriptorObject for Monitor {
    fn kind(&self) -> &'static str {
        "monitor"
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: Vec::new(),
                item_count: 0,
            }),
            closed: AtomicBool::new(false),
            outstanding_polls: AtomicUsize::new(0),
            triggered: Semaphore::new(0, u32::MAX),
        }
    }

    fn find_live(state: &State, key: u64) -> Option<usize> {
        state.items[..state.item_count].iter().position(|i| i.key == key)
    }

    /// Apply a batch of item changes atomically with respect to any
    /// concurrent `poll`.
    pub fn update(&self, requests: Vec<UpdateRequest>) -> Result<()> {
        let mut state = self.state.lock();
        for request in requests {
            let key = request.key;
            let disable = request.disable;
            let strict_match = request.strict_match;
            let edge_triggered = request.edge_triggered;
            let disable_on_trigger = request.disable_on_trigger;
            let delete_on_trigger = request.delete_on_trigger;
            let existing = Self::find_live(&state, key);

            match request.op {
                UpdateOp::Create { kind, mask } => match existing {
                    Some(_) if strict_match => {
                        return Err(KernelError::AlreadyInProgress {
                            resource: "monitor item",
                        });
                    }
                    Some(index) => {
                        state.items[index].mask = mask;
                        state.items[index].enabled = !disable;
                        if let Some(edge) = edge_triggered {
                            state.items[index].edge_triggered = edge;
                        }
                        state.items[index].disable_on_trigger = disable_on_trigger;
                        state.items[index].delete_on_trigger = delete_on_trigger;
                    }
                    None => {
                        let mut item = MonitorItem::new(key, kind, mask);
                        item.enabled = !disable;
                        if let Some(edge) = edge_triggered {
                            item.edge_triggered = edge;
                        }
                        item.disable_on_trigger = disable_on_trigger;
                        item.delete_on_trigger = delete_on_trigger;
                        let insert_at = state.item_count;
                        state.items.push(item);
                        let last = state.items.len() - 1;
                        state.items.swap(insert_at, last);
                        state.item_count += 1;
                    }
                },
                UpdateOp::Update { mask } => match existing {
                    Some(index) => {
                        state.items[index].mask = mask;
                        state.items[index].enabled = !disable;
                        if let Some(edge) = edge_triggered {
                            state.items[index].edge_triggered = edge;
                        }
                        state.items[index].disable_on_trigger = disable_on_trigger;
                        state.items[index].delete_on_trigger = delete_on_trigger;
                    }
                    None if strict_match => {
                        return Err(KernelError::NoSuchResource {
                            resource: "monitor item",
                            id: key,
                        });
                    }
                    None => {}
                },
                UpdateOp::Delete => match existing {
                    Some(index) => {
                        state.item_count -= 1;
                        let boundary = state.item_count;
                        state.items.swap(index, boundary);
                        state.items[boundary].pending_delete = true;
                    }
                    None if strict_match => {
                        return Err(KernelError::NoSuchResource {
                            resource: "monitor item",
                            id: key,
                        });
                    }
                    None => {}
                },
            }
        }
        drop(state);
        // Conservative: any update could have made something reportable,
        // so wake one blocked poll to re-check rather than tracking
        // exactly which change mattered.
        self.triggered.release().ok();
        Ok(())
    }

    fn collect_ready(state: &mut State, now: u64) -> Vec<TriggeredItem> {
        let mut ready = Vec::new();

        // Report last call's deletions before this call's live pass can
        // add more to the dead region -- keeps a delete-on-trigger item
        // from being reported deleted in the same poll call it triggered.
        let dead_start = state.item_count;
        for item in state.items[dead_start..].iter() {
            if item.pending_delete {
                ready.push(TriggeredItem {
                    key: item.key,
                    bits: 0,
                    deleted: true,
                });
            }
        }
        if state.items.len() > dead_start {
            state.items.truncate(dead_start);
        }

        let mut to_delete = Vec::new();
        let mut to_disable = Vec::new();

        for item in state.items[..state.item_count].iter_mut() {
            if !item.enabled {
                continue;
            }
            let (active, bits) = item.kind.level(now);
            let reportable_bits = bits & item.mask;

            let should_report = if item.edge_triggered {
                active && !item.last_active && reportable_bits != 0
            } else {
                active && reportable_bits != 0
            };
            item.last_active = active;

            if should_report {
                ready.push(TriggeredItem {
                    key: item.key,
                    bits: reportable_bits,
                    deleted: false,
                });
                if item.delete_on_trigger {
                    to_delete.push(item.key);
                } else if item.disable_on_trigger {
                    to_disable.push(item.key);
                }
            }
        }

        for key in to_disable {
            if let Some(index) = Self::find_live(state, key) {
                state.items[index].enabled = false;
            }
        }
        for key in to_delete {
            if let Some(index) = Self::find_live(state, key) {
                state.item_count -= 1;
                let boundary = state.item_count;
                state.items.swap(index, boundary);
                state.items[boundary].pending_delete = true;
            }
        }

        ready
    }

    /// Report currently active items. Under `PollTimeout::Forever`, blocks
    /// on `triggered` once nothing is ready -- there is no scheduler to
    /// park this caller against, so that block is itself a spin, but one
    /// gated behind a count `update`/`close` drive instead of an
    /// unconditional `spin_loop`.
    pub fn poll(&self, now: u64, timeout: PollTimeout) -> Vec<TriggeredItem> {
        loop {
            let ready = {
                let mut state = self.state.lock();
                Self::collect_ready(&mut state, now)
            };
            if !ready.is_empty() {
                return ready;
            }
            if self.closed.load(Ordering::Acquire) {
                return ready;
            }
            match timeout {
                PollTimeout::Zero => return ready,
                PollTimeout::Forever => {
                    self.outstanding_polls.fetch_add(1, Ordering::Relaxed);
                    self.triggered.acquire();
                    self.outstanding_polls.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Close the monitor: every outstanding `poll(Forever)` call returns
    /// (with whatever, possibly nothing, is ready), and every live item is
    /// disabled so a racing `poll` started just after `close` returns
    /// immediately too.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        {
            let mut state = self.state.lock();
            for item in state.items[..state.item_count].iter_mut() {
                item.enabled = false;
            }
        }
        let waiters = self.outstanding_polls.load(Ordering::Relaxed).max(1);
        for _ in 0..waiters {
            self.triggered.release().ok();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn item_count(&self) -> usize {
        self.state.lock().item_count
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use crate::ipc::Endpoint;
    use alloc::vec;

    #[test]
    fn channel_item_reports_readable_once_data_arrives() {
        let monitor = Monitor::new();
        let (c0, c1) = Endpoint::new_pair(8);
        monitor
            .update(vec![UpdateRequest {
                key: 1,
                op: UpdateOp::Create {
                    kind: ItemKind::Channel(c1.clone()),
                    mask: signal::READABLE,
                },
                disable: false,
                strict_match: true,
                edge_triggered: None,
                disable_on_trigger: false,
                delete_on_trigger: false,
            }])
            .unwrap();

        assert!(monitor.poll(0, PollTimeout::Zero).is_empty());
        c0.send(crate::ipc::Message::new(0, vec![1], vec![])).unwrap();
        let ready = monitor.poll(0, PollTimeout::Zero);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].key, 1);
    }

    #[test]
    fn futex_item_is_edge_triggered() {
        use alloc::sync::Arc;
        use core::sync::atomic::AtomicU32;

        let monitor = Monitor::new();
        let cell = Arc::new(AtomicU32::new(0));
        monitor
            .update(vec![UpdateRequest {
                key: 2,
                op: UpdateOp::Create {
                    kind: ItemKind::Futex {
                        cell: cell.clone(),
                        expected: 0,
                    },
                    mask: signal::FUTEX_CHANGED,
                },
                disable: false,
                strict_match: true,
                edge_triggered: None,
                disable_on_trigger: false,
                delete_on_trigger: false,
            }])
            .unwrap();

        cell.store(1, core::sync::atomic::Ordering::SeqCst);
        let first = monitor.poll(0, PollTimeout::Zero);
        assert_eq!(first.len(), 1);
        // Still different from `expected`, but edge-triggered: no repeat
        // report without another transition.
        let second = monitor.poll(0, PollTimeout::Zero);
        assert!(second.is_empty());
    }

    #[test]
    fn channel_item_can_be_registered_edge_triggered() {
        let monitor = Monitor::new();
        let (c0, c1) = Endpoint::new_pair(8);
        monitor
            .update(vec![UpdateRequest {
                key: 9,
                op: UpdateOp::Create {
                    kind: ItemKind::Channel(c1),
                    mask: signal::READABLE,
                },
                disable: false,
                strict_match: true,
                edge_triggered: Some(true),
                disable_on_trigger: false,
                delete_on_trigger: false,
            }])
            .unwrap();

        c0.send(crate::ipc::Message::new(0, vec![1], vec![])).unwrap();
        let first = monitor.poll(0, PollTimeout::Zero);
        assert_eq!(first.len(), 1);
        // Message is still queued (readable level hasn't changed), but
        // edge-triggered means no repeat report without a fresh transition.
        let second = monitor.poll(0, PollTimeout::Zero);
        assert!(second.is_empty());
    }

    #[test]
    fn delete_on_trigger_removes_the_item_after_one_report() {
        let monitor = Monitor::new();
        let (c0, c1) = Endpoint::new_pair(8);
        monitor
            .update(vec![UpdateRequest {
                key: 5,
                op: UpdateOp::Create {
                    kind: ItemKind::Channel(c1),
                    mask: signal::READABLE,
                },
                disable: false,
                strict_match: true,
                edge_triggered: None,
                disable_on_trigger: false,
                delete_on_trigger: true,
            }])
            .unwrap();
        c0.send(crate::ipc::Message::new(0, vec![1], vec![])).unwrap();

        let first = monitor.poll(0, PollTimeout::Zero);
        assert_eq!(first.len(), 1);
        assert!(!first[0].deleted);
        assert_eq!(monitor.item_count(), 0);

        let second = monitor.poll(0, PollTimeout::Zero);
        assert_eq!(second.len(), 1);
        assert!(second[0].deleted);

        let third = monitor.poll(0, PollTimeout::Zero);
        assert!(third.is_empty());
    }

    #[test]
    fn delete_reports_once_then_disappears() {
        let monitor = Monitor::new();
        let (_c0, c1) = Endpoint::new_pair(8);
        monitor
            .update(vec![UpdateRequest {
                key: 3,
                op: UpdateOp::Create {
                    kind: ItemKind::Channel(c1),
                    mask: signal::READABLE,
                },
                disable: false,
                strict_match: true,
                edge_triggered: None,
                disable_on_trigger: false,
                delete_on_trigger: false,
            }])
            .unwrap();
        monitor.update(vec![UpdateRequest::simple(3, UpdateOp::Delete)]).unwrap();

        let ready = monitor.poll(0, PollTimeout::Zero);
        assert_eq!(ready.len(), 1);
        assert!(ready[0].deleted);
        assert_eq!(monitor.item_count(), 0);

        let again = monitor.poll(0, PollTimeout::Zero);
        assert!(again.is_empty());
    }

    #[test]
    fn strict_match_rejects_duplicate_create() {
        let monitor = Monitor::new();
        let (_c0, c1) = Endpoint::new_pair(8);
        monitor
            .update(vec![UpdateRequest {
                key: 4,
                op: UpdateOp::Create {
                    kind: ItemKind::Channel(c1.clone()),
                    mask: signal::READABLE,
                },
                disable: false,
                strict_match: true,
                edge_triggered: None,
                disable_on_trigger: false,
                delete_on_trigger: false,
            }])
            .unwrap();
        let result = monitor.update(vec![UpdateRequest {
            key: 4,
            op: UpdateOp::Create {
                kind: ItemKind::Channel(c1),
                mask: signal::READABLE,
            },
            disable: false,
            strict_match: true,
            edge_triggered: None,
            disable_on_trigger: false,
            delete_on_trigger: false,
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn close_disables_every_item_and_unblocks_a_forever_poll() {
        let monitor = Monitor::new();
        let (_c0, c1) = Endpoint::new_pair(8);
        monitor
            .update(vec![UpdateRequest::simple(
                6,
                UpdateOp::Create {
                    kind: ItemKind::Channel(c1),
                    mask: signal::READABLE,
                },
            )])
            .unwrap();

        monitor.close();
        assert!(monitor.is_closed());
        assert!(monitor.poll(0, PollTimeout::Forever).is_empty());
    }
}
