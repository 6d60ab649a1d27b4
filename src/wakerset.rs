//! Bookkeeping for the tasks waiting on one shared batch slot.
//!
//! A batch is shared work: only one task needs to drive it forward, but
//! every task must eventually be woken. The set remembers which waker most
//! recently polled the shared work (the "driver"); if that task goes away,
//! an arbitrary remaining waker is elected and woken so the batch always has
//! a path forward.

use std::task::Waker;

/// Handle to one waker slot. Deliberately not `Clone`: a token belongs to
/// exactly one future and is surrendered when the future completes or drops.
#[derive(Debug)]
pub(crate) struct WakerToken(usize);

#[derive(Debug, Default)]
pub(crate) struct WakerSet {
    // Slot indices double as tokens. Slots are never reused; these sets live
    // for one batch and stay small.
    slots: Vec<Option<Waker>>,
    driver: Option<usize>,
}

impl WakerSet {
    /// Add a waker, making it the driver. The returned token is used to
    /// update or surrender the slot on later polls.
    #[must_use]
    pub(crate) fn register(&mut self, waker: &Waker) -> WakerToken {
        let slot = self.slots.len();
        self.slots.push(Some(waker.clone()));
        self.driver = Some(slot);
        WakerToken(slot)
    }

    /// Refresh the waker in an existing slot and make it the driver, on the
    /// assumption that it was just used to poll the shared work.
    pub(crate) fn update(&mut self, token: &WakerToken, waker: &Waker) {
        self.slots[token.0]
            .as_mut()
            .expect("waker token refers to a surrendered slot")
            .clone_from(waker);
        self.driver = Some(token.0);
    }

    /// Surrender a slot. If it was the driver (or no driver exists), elect a
    /// remaining waker and wake it immediately so the shared work keeps
    /// moving even when several futures drop back to back.
    pub(crate) fn forget_and_wake_next(&mut self, token: WakerToken) {
        self.slots[token.0] = None;
        if self.driver == Some(token.0) || self.driver.is_none() {
            self.driver = None;
            for (slot, waker) in self.slots.iter().enumerate() {
                if let Some(waker) = waker {
                    self.driver = Some(slot);
                    waker.wake_by_ref();
                    break;
                }
            }
        }
    }

    /// Wake the current driver, if any. Used when a batch is forced closed
    /// (key limit reached) and the driving task should re-poll now.
    pub(crate) fn wake_driver(&self) {
        if let Some(slot) = self.driver {
            if let Some(waker) = &self.slots[slot] {
                waker.wake_by_ref();
            }
        }
    }

    /// Wake everyone except the caller, who is about to take its own result.
    pub(crate) fn wake_all_except(self, own: Option<&WakerToken>) {
        let skip = own.map(|token| token.0);
        for (slot, waker) in self.slots.into_iter().enumerate() {
            if Some(slot) != skip {
                if let Some(waker) = waker {
                    waker.wake();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use cooked_waker::{IntoWaker, Wake, WakeRef};

    #[derive(Debug, Clone, Default)]
    struct CountingWaker {
        count: Arc<AtomicUsize>,
    }

    impl CountingWaker {
        fn wakes(&self) -> usize {
            self.count.load(Ordering::SeqCst)
        }
    }

    impl WakeRef for CountingWaker {
        fn wake_by_ref(&self) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Wake for CountingWaker {}

    #[test]
    fn dropping_the_driver_elects_and_wakes_another() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();

        let mut set = WakerSet::default();
        let token1 = set.register(&Arc::new(first.clone()).into_waker());
        let token2 = set.register(&Arc::new(second.clone()).into_waker());

        // token2 registered last, so it drives; surrendering it must wake
        // the remaining slot.
        set.forget_and_wake_next(token2);
        assert_eq!(first.wakes(), 1);
        assert_eq!(second.wakes(), 0);

        set.forget_and_wake_next(token1);
        assert_eq!(first.wakes(), 1);
        assert_eq!(second.wakes(), 0);
    }

    #[test]
    fn dropping_a_non_driver_wakes_nobody() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();

        let mut set = WakerSet::default();
        let token1 = set.register(&Arc::new(first.clone()).into_waker());
        let _token2 = set.register(&Arc::new(second.clone()).into_waker());

        set.forget_and_wake_next(token1);
        assert_eq!(first.wakes(), 0);
        assert_eq!(second.wakes(), 0);
    }

    #[test]
    fn completion_skips_the_caller() {
        let first = CountingWaker::default();
        let second = CountingWaker::default();

        let mut set = WakerSet::default();
        let _token1 = set.register(&Arc::new(first.clone()).into_waker());
        let token2 = set.register(&Arc::new(second.clone()).into_waker());

        set.wake_all_except(Some(&token2));
        assert_eq!(first.wakes(), 1);
        assert_eq!(second.wakes(), 0);
    }
}
