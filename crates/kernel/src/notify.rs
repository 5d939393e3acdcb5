//! Per-cell synchronous notifications.
//!
//! A cell carries an optional bundle of `(index, bitmask, callback, user data)`
//! entries. Executing a notification invokes every entry whose index matches
//! and whose bitmask intersects the requested one, in registration order.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::cell::Cell;

/// `param` passed by `Cell::validate_event`.
pub const EVENT_VALIDATED: u32 = 1;
/// `param` passed by `Cell::invalidate_event`.
pub const EVENT_INVALIDATED: u32 = 0;

/// Arguments handed to a notification callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifEvent {
    pub index: u32,
    /// Bitmask passed to `execute_notif`, not the registered one.
    pub bitmask: u32,
    pub param: u32,
    /// User data registered with the entry.
    pub user_data: u64,
}

type NotifFn = dyn Fn(&mut Cell, &NotifEvent) -> bool;

/// Shared notification callback. Two callbacks are equal when they are
/// clones of the same closure.
#[derive(Clone)]
pub struct NotifCallback(Rc<NotifFn>);

impl NotifCallback {
    pub fn new(f: impl Fn(&mut Cell, &NotifEvent) -> bool + 'static) -> Self {
        Self(Rc::new(f))
    }

    fn call(&self, cell: &mut Cell, event: &NotifEvent) -> bool {
        (self.0)(cell, event)
    }
}

impl PartialEq for NotifCallback {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for NotifCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotifCallback({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// Result of `Cell::execute_notif`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifOutcome {
    /// Number of callbacks invoked.
    pub fired: usize,
    /// OR of every callback's return value.
    pub result: bool,
}

impl NotifOutcome {
    pub fn any_fired(&self) -> bool {
        self.fired > 0
    }
}

#[derive(Debug, Clone)]
struct NotifEntry {
    id: u64,
    index: u32,
    bitmask: u32,
    callback: NotifCallback,
    user_data: u64,
}

/// Notification entries plus the per-index event state bits.
#[derive(Debug, Clone, Default)]
pub struct NotifBundle {
    entries: Vec<NotifEntry>,
    events: BTreeMap<u32, u32>,
}

impl NotifBundle {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry. `id` must never have been used on this cell, even
    /// by a bundle that has since been cleared.
    pub(crate) fn push(&mut self, id: u64, index: u32, bitmask: u32, callback: NotifCallback, user_data: u64) {
        self.entries.push(NotifEntry {
            id,
            index,
            bitmask,
            callback,
            user_data,
        });
    }

    /// Remove entries at `index`, restricted to `callback` when given.
    pub(crate) fn remove(&mut self, index: u32, callback: Option<&NotifCallback>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|e| e.index != index || callback.is_some_and(|cb| *cb != e.callback));
        before - self.entries.len()
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub(crate) fn event_state(&self, index: u32) -> u32 {
        self.events.get(&index).copied().unwrap_or(0)
    }

    pub(crate) fn set_event_bits(&mut self, index: u32, bitmask: u32, set: bool) {
        let bits = self.events.entry(index).or_insert(0);
        if set {
            *bits |= bitmask;
        } else {
            *bits &= !bitmask;
        }
        if *bits == 0 {
            self.events.remove(&index);
        }
    }
}

/// Run every matching entry of `cell`'s bundle.
///
/// Matches are collected before the first callback runs, so callbacks may
/// freely register or remove entries. An entry removed by an earlier callback
/// of the same scan is skipped; entries registered during the scan only fire
/// on later calls.
pub(crate) fn execute(cell: &mut Cell, index: u32, bitmask: u32, param: u32) -> NotifOutcome {
    let matches: Vec<NotifEntry> = match cell.notifs.as_ref() {
        Some(bundle) => bundle
            .entries
            .iter()
            .filter(|e| e.index == index && e.bitmask & bitmask != 0)
            .cloned()
            .collect(),
        None => return NotifOutcome::default(),
    };

    let mut outcome = NotifOutcome::default();
    for entry in matches {
        let still_registered = cell.notifs.as_ref().is_some_and(|b| b.contains(entry.id));
        if !still_registered {
            continue;
        }
        let event = NotifEvent {
            index,
            bitmask,
            param,
            user_data: entry.user_data,
        };
        tracing::trace!(kid = %cell.kid(), index, bitmask, "notification fired");
        outcome.result |= entry.callback.call(cell, &event);
        outcome.fired += 1;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BasicCell;
    use crate::kernel::Kernel;
    use cellgraph_common::Kid;
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<&'static str>>>;

    fn recorder(log: &Log, tag: &'static str) -> NotifCallback {
        let log = log.clone();
        NotifCallback::new(move |_, _| {
            log.borrow_mut().push(tag);
            true
        })
    }

    fn setup() -> (Kernel, Kid) {
        let mut k = Kernel::new();
        let kid = k.create(BasicCell::new()).unwrap();
        (k, kid)
    }

    #[test]
    fn matching_entries_fire_in_registration_order() {
        let (mut k, kid) = setup();
        let log = Log::default();
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(5, 0b0010, recorder(&log, "first"), 0);
        cell.register_notif(5, 0b1000, recorder(&log, "skipped"), 0);
        cell.register_notif(4, 0b0110, recorder(&log, "other index"), 0);
        cell.register_notif(5, 0b0100, recorder(&log, "second"), 0);

        let outcome = cell.execute_notif(5, 0b0110, 3);
        assert_eq!(outcome, NotifOutcome { fired: 2, result: true });
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn results_are_ored() {
        let (mut k, kid) = setup();
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(1, 1, NotifCallback::new(|_, _| false), 0);
        assert_eq!(cell.execute_notif(1, 1, 0), NotifOutcome { fired: 1, result: false });
        cell.register_notif(1, 1, NotifCallback::new(|_, _| true), 0);
        assert!(cell.execute_notif(1, 1, 0).result);
        assert!(!cell.execute_notif(2, 1, 0).any_fired());
    }

    #[test]
    fn callback_sees_event_and_its_cell() {
        let (mut k, kid) = setup();
        let seen = Rc::new(RefCell::new(None));
        let sink = seen.clone();
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(
            9,
            0xF0,
            NotifCallback::new(move |cell, event| {
                *sink.borrow_mut() = Some((cell.kid(), *event));
                cell.bind_data("touched", 1);
                true
            }),
            42,
        );
        cell.execute_notif(9, 0x10, 7);

        let expected = NotifEvent {
            index: 9,
            bitmask: 0x10,
            param: 7,
            user_data: 42,
        };
        assert_eq!(*seen.borrow(), Some((kid, expected)));
        assert_eq!(k.get(kid).unwrap().get_data("touched"), Some(1));
    }

    #[test]
    fn self_removal_during_scan_is_safe() {
        let (mut k, kid) = setup();
        let log = Log::default();
        let inner = log.clone();
        let once = NotifCallback::new(move |cell, event| {
            inner.borrow_mut().push("once");
            cell.remove_notif(event.index, None);
            true
        });
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(2, 1, once, 0);
        cell.register_notif(2, 1, recorder(&log, "later"), 0);

        assert_eq!(cell.execute_notif(2, 1, 0).fired, 1);
        assert_eq!(*log.borrow(), vec!["once"]);
        assert_eq!(cell.nb_notifs(), 0);
        assert!(!cell.execute_notif(2, 1, 0).any_fired());
    }

    #[test]
    fn cleared_entries_stay_dead_after_reregistration() {
        let (mut k, kid) = setup();
        let log = Log::default();
        let inner = log.clone();
        let filler = recorder(&log, "filler");
        let resetter = NotifCallback::new(move |cell, _| {
            inner.borrow_mut().push("resetter");
            cell.clear_notifs();
            cell.register_notif(9, 1, filler.clone(), 0);
            cell.register_notif(9, 1, filler.clone(), 0);
            true
        });
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(1, 1, resetter, 0);
        cell.register_notif(1, 1, recorder(&log, "cleared"), 0);

        assert_eq!(cell.execute_notif(1, 1, 0).fired, 1);
        assert_eq!(*log.borrow(), vec!["resetter"]);
        assert_eq!(cell.nb_notifs(), 2);
    }

    #[test]
    fn removing_a_later_entry_skips_it() {
        let (mut k, kid) = setup();
        let log = Log::default();
        let victim = recorder(&log, "victim");
        let target = victim.clone();
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(
            3,
            1,
            NotifCallback::new(move |cell, _| cell.remove_notif(3, Some(&target))),
            0,
        );
        cell.register_notif(3, 1, victim, 0);

        let outcome = cell.execute_notif(3, 1, 0);
        assert_eq!(outcome.fired, 1);
        assert!(log.borrow().is_empty());
        assert_eq!(cell.nb_notifs(), 1);
    }

    #[test]
    fn registration_during_scan_fires_next_time() {
        let (mut k, kid) = setup();
        let log = Log::default();
        let added = recorder(&log, "added");
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(
            1,
            1,
            NotifCallback::new(move |cell, _| cell.register_notif(1, 1, added.clone(), 0)),
            0,
        );

        assert_eq!(cell.execute_notif(1, 1, 0).fired, 1);
        assert!(log.borrow().is_empty());
        assert_eq!(cell.execute_notif(1, 1, 0).fired, 2);
        assert_eq!(*log.borrow(), vec!["added"]);
    }

    #[test]
    fn remove_by_callback_or_index() {
        let (mut k, kid) = setup();
        let log = Log::default();
        let a = recorder(&log, "a");
        let b = recorder(&log, "b");
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(1, 1, a.clone(), 0);
        cell.register_notif(1, 1, b.clone(), 0);
        cell.register_notif(2, 1, a.clone(), 0);

        assert!(cell.remove_notif(1, Some(&a)));
        assert!(!cell.remove_notif(1, Some(&a)));
        assert_eq!(cell.nb_notifs(), 2);
        assert!(cell.remove_notif(2, None));
        assert_eq!(cell.nb_notifs(), 1);
        assert!(cell.clear_notifs());
        assert!(!cell.clear_notifs());
        assert!(!cell.remove_notif(1, Some(&b)));
    }

    #[test]
    fn locked_cell_refuses_registration() {
        let (mut k, kid) = setup();
        k.set_locked(kid, true).unwrap();
        let cell = k.cell_mut(kid).unwrap();
        assert!(!cell.register_notif(1, 1, NotifCallback::new(|_, _| true), 0));
        assert_eq!(cell.nb_notifs(), 0);
    }

    #[test]
    fn event_bits_track_validation() {
        let (mut k, kid) = setup();
        let params = Rc::new(RefCell::new(Vec::new()));
        let sink = params.clone();
        let cell = k.cell_mut(kid).unwrap();
        cell.register_notif(
            6,
            0b11,
            NotifCallback::new(move |_, event| {
                sink.borrow_mut().push(event.param);
                true
            }),
            0,
        );

        assert_eq!(cell.event_state(6), 0);
        cell.validate_event(6, 0b01);
        cell.validate_event(6, 0b10);
        assert_eq!(cell.event_state(6), 0b11);
        cell.invalidate_event(6, 0b01);
        assert_eq!(cell.event_state(6), 0b10);
        assert_eq!(*params.borrow(), vec![EVENT_VALIDATED, EVENT_VALIDATED, EVENT_INVALIDATED]);
    }

    #[test]
    fn callbacks_compare_by_identity() {
        let a = NotifCallback::new(|_, _| true);
        let b = NotifCallback::new(|_, _| true);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
