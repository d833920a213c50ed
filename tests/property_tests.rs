//! Property-based tests for handle lifetimes.
//!
//! Uses proptest to generate random sequences of handle operations on one payload and checks
//! the counts and the payload's destruction after every step.

use proptest::prelude::*;
use shared_handle::{Shared, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Tracked(Arc<AtomicUsize>);

impl Drop for Tracked {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Debug)]
enum Op {
    CloneStrong(usize),
    DropStrong(usize),
    TakeStrong(usize),
    CloneFromStrong(usize, usize),
    Downgrade(usize),
    CloneWeak(usize),
    DropWeak(usize),
    Promote(usize),
}

/// Strategy for generating single handle operations
fn op() -> impl Strategy<Value = Op> {
    let idx = 0usize..16;
    prop_oneof![
        idx.clone().prop_map(Op::CloneStrong),
        idx.clone().prop_map(Op::DropStrong),
        idx.clone().prop_map(Op::TakeStrong),
        (idx.clone(), idx.clone()).prop_map(|(a, b)| Op::CloneFromStrong(a, b)),
        idx.clone().prop_map(Op::Downgrade),
        idx.clone().prop_map(Op::CloneWeak),
        idx.clone().prop_map(Op::DropWeak),
        idx.prop_map(Op::Promote),
    ]
}

struct World {
    strong: Vec<Shared<Tracked>>,
    weak: Vec<Weak<Tracked>>,
    drops: Arc<AtomicUsize>,
}

impl World {
    fn new() -> Self {
        let drops = Arc::new(AtomicUsize::new(0));
        let first = Shared::new(Tracked(Arc::clone(&drops)));
        World { strong: vec![first], weak: Vec::new(), drops }
    }

    fn live_strong(&self) -> usize {
        self.strong.iter().filter(|s| !s.is_empty()).count()
    }

    fn apply(&mut self, op: Op) {
        match op {
            Op::CloneStrong(i) if !self.strong.is_empty() => {
                let copy = self.strong[i % self.strong.len()].clone();
                self.strong.push(copy);
            }
            Op::DropStrong(i) if !self.strong.is_empty() => {
                let len = self.strong.len();
                drop(self.strong.swap_remove(i % len));
            }
            Op::TakeStrong(i) if !self.strong.is_empty() => {
                let len = self.strong.len();
                let moved = self.strong[i % len].take();
                self.strong.push(moved);
            }
            Op::CloneFromStrong(i, j) if !self.strong.is_empty() => {
                let len = self.strong.len();
                let source = self.strong[j % len].clone();
                self.strong[i % len].clone_from(&source);
            }
            Op::Downgrade(i) if !self.strong.is_empty() => {
                let weak = self.strong[i % self.strong.len()].downgrade();
                self.weak.push(weak);
            }
            Op::CloneWeak(i) if !self.weak.is_empty() => {
                let copy = self.weak[i % self.weak.len()].clone();
                self.weak.push(copy);
            }
            Op::DropWeak(i) if !self.weak.is_empty() => {
                let len = self.weak.len();
                drop(self.weak.swap_remove(i % len));
            }
            Op::Promote(i) if !self.weak.is_empty() => {
                let promoted = self.weak[i % self.weak.len()].promote();
                self.strong.push(promoted);
            }
            _ => {}
        }
    }
}

proptest! {
    /// The payload is destroyed exactly when the last strong handle goes, and never twice
    #[test]
    fn payload_destroyed_once(ops in prop::collection::vec(op(), 0..64)) {
        let mut world = World::new();
        let mut ever_dead = false;

        for op in ops {
            world.apply(op);

            let live = world.live_strong();
            let drops = world.drops.load(Ordering::SeqCst);
            prop_assert!(drops <= 1);
            prop_assert_eq!(drops == 1, live == 0);

            // Zero is terminal: nothing brings the payload back.
            if ever_dead {
                prop_assert_eq!(live, 0);
            }
            ever_dead |= live == 0;
        }

        let drops = Arc::clone(&world.drops);
        drop(world);
        prop_assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    /// Counts observed through any handle match the number of live handles
    #[test]
    fn counts_match_live_handles(ops in prop::collection::vec(op(), 0..64)) {
        let mut world = World::new();

        for op in ops {
            world.apply(op);

            let live = world.live_strong();
            let observers = world.weak.iter().filter(|w| !w.is_empty()).count();
            for strong in world.strong.iter().filter(|s| !s.is_empty()) {
                prop_assert_eq!(strong.use_count(), live);
                prop_assert_eq!(strong.weak_count(), observers);
            }
            for weak in world.weak.iter().filter(|w| !w.is_empty()) {
                prop_assert_eq!(weak.use_count(), live);
                prop_assert_eq!(weak.expired(), live == 0);
            }
        }
    }

    /// Promoting and immediately dropping leaves both counts untouched
    #[test]
    fn promote_round_trip(extra_strong in 0usize..8, extra_weak in 1usize..8) {
        let first = Shared::new(0u8);
        let strong: Vec<_> = (0..extra_strong).map(|_| first.clone()).collect();
        let weak: Vec<_> = (0..extra_weak).map(|_| first.downgrade()).collect();
        let before = (first.use_count(), first.weak_count());

        for w in &weak {
            let promoted = w.promote();
            prop_assert_eq!(promoted.use_count(), before.0 + 1);
            drop(promoted);
            prop_assert_eq!((first.use_count(), first.weak_count()), before);
        }
        drop(strong);
    }
}
