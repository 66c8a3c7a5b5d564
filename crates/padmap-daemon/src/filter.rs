//! Per-event remap decision core
//!
//! # Filter State Machine
//!
//! [`FilterCore`] makes the pass-through / substitute decision for every raw
//! key event and owns the one piece of loop-local mutable state the engine
//! needs: the in-flight map of pressed-and-not-yet-released source keys.
//!
//! ```text
//! raw event ──► origin == target? ──no──► Pass
//!                     │yes
//!                     ▼
//!               transition?
//!      press ────────┼──────── release
//!        │        repeat            │
//!        ▼           │              ▼
//!  decide emitted    │     in-flight entry? ──yes──► use frozen code,
//!  (lookup if table  │              │no              clear entry
//!  enabled, else     ▼              ▼
//!  source), freeze   reuse frozen   table lookup
//!  in in-flight map  code if held   fallback
//! ```
//!
//! ## In-flight freeze
//!
//! The emitted code for a press is frozen at press time and reused for every
//! repeat and for the matching release, no matter how the mapping table (or
//! its enabled flag) changes in between. Without this, removing a mapping
//! mid-hold would emit `press(F1) .. release(A)` and leave F1 logically held
//! downstream as a stuck key.
//!
//! Pass-through presses are tracked too, not just remapped ones: a press that
//! went through as `A` must release as `A` even if an `A → F1` entry is added
//! (or the table is enabled) while the key is held. The freeze is symmetric.
//!
//! Every input event yields exactly one verdict; the filter never duplicates
//! and never drops. Substitution consumes the original by construction: the
//! grabbed device's event is simply not forwarded.

use std::collections::HashMap;

use padmap_config::{DeviceId, KeyCode, MappingTable};

/// Key transition type, in evdev event-value encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Key up (value 0)
    Release,
    /// Key down (value 1)
    Press,
    /// Autorepeat while held (value 2)
    Repeat,
}

impl Transition {
    /// Classify an evdev KEY event value. Unknown values are not key
    /// transitions and must be passed through by the caller.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            0 => Some(Transition::Release),
            1 => Some(Transition::Press),
            2 => Some(Transition::Repeat),
            _ => None,
        }
    }
}

/// What to do with a raw key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward the event unchanged.
    Pass,
    /// Consume the original and emit the same transition with this key code.
    Substitute(KeyCode),
}

/// Read view of the shared engine state consulted on every event.
///
/// Built under the state lock by the filter task; `process` never blocks.
#[derive(Debug, Clone, Copy)]
pub struct RemapView<'a> {
    pub target: Option<&'a DeviceId>,
    pub table: &'a MappingTable,
}

/// The filter loop's decision engine and in-flight press tracking.
///
/// Private to the filter task; other execution contexts mutate the mapping
/// table only through the shared state the [`RemapView`] is built from.
#[derive(Debug, Default)]
pub struct FilterCore {
    /// source key -> emitted key, frozen at press time
    in_flight: HashMap<KeyCode, KeyCode>,
}

impl FilterCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the fate of one raw key event.
    pub fn process(
        &mut self,
        view: &RemapView<'_>,
        origin: &DeviceId,
        code: KeyCode,
        transition: Transition,
    ) -> Verdict {
        // Events from anything but the target device are never touched.
        if view.target != Some(origin) {
            return Verdict::Pass;
        }

        match transition {
            Transition::Press => {
                let emitted = self.decide_emitted(view, code);
                self.in_flight.insert(code, emitted);
                verdict(code, emitted)
            }
            Transition::Repeat => {
                // Repeats reuse the code frozen at the initial press. A
                // repeat without an observed press (held across engine start)
                // is treated as an initial press.
                let emitted = match self.in_flight.get(&code) {
                    Some(&frozen) => frozen,
                    None => {
                        let emitted = self.decide_emitted(view, code);
                        self.in_flight.insert(code, emitted);
                        emitted
                    }
                };
                verdict(code, emitted)
            }
            Transition::Release => {
                let emitted = match self.in_flight.remove(&code) {
                    Some(frozen) => frozen,
                    // Release without an observed press: best effort lookup.
                    None => self.decide_emitted(view, code),
                };
                verdict(code, emitted)
            }
        }
    }

    /// Emitted codes still logically held, for teardown release synthesis.
    ///
    /// Clears the in-flight map. Sorted and deduplicated so teardown is
    /// deterministic even when two sources map to the same target.
    pub fn drain_held(&mut self) -> Vec<KeyCode> {
        let mut held: Vec<KeyCode> = self.in_flight.drain().map(|(_, emitted)| emitted).collect();
        held.sort_unstable();
        held.dedup();
        held
    }

    fn decide_emitted(&self, view: &RemapView<'_>, code: KeyCode) -> KeyCode {
        if view.table.enabled {
            view.table.lookup(code).unwrap_or(code)
        } else {
            code
        }
    }
}

fn verdict(code: KeyCode, emitted: KeyCode) -> Verdict {
    if emitted == code {
        Verdict::Pass
    } else {
        Verdict::Substitute(emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: KeyCode = 30;
    const KEY_B: KeyCode = 48;
    const KEY_S: KeyCode = 31;
    const KEY_F1: KeyCode = 59;
    const KEY_F2: KeyCode = 60;

    fn pad() -> DeviceId {
        DeviceId::new("1209:0001:pad-serial")
    }

    fn other_keyboard() -> DeviceId {
        DeviceId::new("046d:c31c:usb-0000:00:14.0-3/input0")
    }

    fn table(entries: &[(KeyCode, KeyCode)]) -> MappingTable {
        let mut table = MappingTable::default();
        for &(source, target) in entries {
            table.add(source, target);
        }
        table
    }

    fn view<'a>(target: Option<&'a DeviceId>, table: &'a MappingTable) -> RemapView<'a> {
        RemapView { target, table }
    }

    #[test]
    fn no_target_passes_everything_through() {
        // End-to-end scenario 1: target device not yet set.
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_F1)]);
        let origin = pad();
        for transition in [Transition::Press, Transition::Repeat, Transition::Release] {
            assert_eq!(
                core.process(&view(None, &table), &origin, KEY_A, transition),
                Verdict::Pass
            );
        }
    }

    #[test]
    fn non_target_device_is_never_touched() {
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();
        let other = other_keyboard();
        assert_eq!(
            core.process(&view(Some(&target), &table), &other, KEY_A, Transition::Press),
            Verdict::Pass
        );
        assert_eq!(
            core.process(&view(Some(&target), &table), &other, KEY_A, Transition::Release),
            Verdict::Pass
        );
    }

    #[test]
    fn mapped_press_and_release_substitute() {
        // End-to-end scenario 2.
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();
        let v = view(Some(&target), &table);

        assert_eq!(
            core.process(&v, &target, KEY_A, Transition::Press),
            Verdict::Substitute(KEY_F1)
        );
        assert_eq!(
            core.process(&v, &target, KEY_A, Transition::Release),
            Verdict::Substitute(KEY_F1)
        );
        // Unmapped key on the target device passes through.
        assert_eq!(
            core.process(&v, &target, KEY_B, Transition::Press),
            Verdict::Pass
        );
    }

    #[test]
    fn disabled_table_passes_through() {
        let mut core = FilterCore::new();
        let mut table = table(&[(KEY_A, KEY_F1)]);
        table.set_enabled(false);
        let target = pad();
        let v = view(Some(&target), &table);

        assert_eq!(core.process(&v, &target, KEY_A, Transition::Press), Verdict::Pass);
        assert_eq!(core.process(&v, &target, KEY_A, Transition::Release), Verdict::Pass);
    }

    #[test]
    fn removal_mid_hold_keeps_frozen_target() {
        // End-to-end scenario 3: entry removed between press and release.
        let mut core = FilterCore::new();
        let mut table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Substitute(KEY_F1)
        );

        table.remove(KEY_A);

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Substitute(KEY_F1)
        );
    }

    #[test]
    fn retarget_mid_hold_keeps_frozen_target() {
        let mut core = FilterCore::new();
        let mut table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Substitute(KEY_F1)
        );

        // Remap A to F2 while A is held: the release still pairs with F1,
        // the next press picks up F2.
        table.add(KEY_A, KEY_F2);

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Substitute(KEY_F1)
        );
        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Substitute(KEY_F2)
        );
    }

    #[test]
    fn mapping_added_mid_hold_does_not_split_the_pair() {
        // The freeze is symmetric: a pass-through press must release as
        // itself even if a mapping appears while the key is held.
        let mut core = FilterCore::new();
        let mut table = MappingTable::default();
        let target = pad();

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Pass
        );

        table.add(KEY_A, KEY_F1);

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Pass
        );
    }

    #[test]
    fn enable_mid_hold_does_not_split_the_pair() {
        let mut core = FilterCore::new();
        let mut table = table(&[(KEY_A, KEY_F1)]);
        table.set_enabled(false);
        let target = pad();

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Pass
        );

        table.set_enabled(true);

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Pass
        );
    }

    #[test]
    fn disable_mid_hold_keeps_frozen_target() {
        let mut core = FilterCore::new();
        let mut table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Substitute(KEY_F1)
        );

        table.set_enabled(false);

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Substitute(KEY_F1)
        );
    }

    #[test]
    fn repeats_reuse_the_frozen_code() {
        let mut core = FilterCore::new();
        let mut table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Substitute(KEY_F1)
        );

        table.remove(KEY_A);

        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Repeat),
            Verdict::Substitute(KEY_F1)
        );
        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Substitute(KEY_F1)
        );
    }

    #[test]
    fn identity_mapping_yields_pass() {
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_A)]);
        let target = pad();
        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Press),
            Verdict::Pass
        );
    }

    #[test]
    fn orphan_release_falls_back_to_lookup() {
        // Release without an observed press (key held across engine start).
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();
        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_A, Transition::Release),
            Verdict::Substitute(KEY_F1)
        );
        assert_eq!(
            core.process(&view(Some(&target), &table), &target, KEY_B, Transition::Release),
            Verdict::Pass
        );
    }

    #[test]
    fn drain_held_reports_emitted_codes_once() {
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_F1), (KEY_S, KEY_F1)]);
        let target = pad();
        let v = view(Some(&target), &table);

        core.process(&v, &target, KEY_A, Transition::Press);
        core.process(&v, &target, KEY_S, Transition::Press);
        core.process(&v, &target, KEY_B, Transition::Press);

        // Two sources frozen to F1 deduplicate; the pass-through B press is
        // held as itself.
        assert_eq!(core.drain_held(), vec![KEY_B, KEY_F1]);
        assert_eq!(core.drain_held(), Vec::<KeyCode>::new());
    }

    #[test]
    fn released_keys_are_not_reported_by_drain() {
        let mut core = FilterCore::new();
        let table = table(&[(KEY_A, KEY_F1)]);
        let target = pad();
        let v = view(Some(&target), &table);

        core.process(&v, &target, KEY_A, Transition::Press);
        core.process(&v, &target, KEY_A, Transition::Release);
        assert_eq!(core.drain_held(), Vec::<KeyCode>::new());
    }
}
