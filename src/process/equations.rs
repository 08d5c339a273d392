/*!
 * Equation Hooks
 *
 * Compiled expressions executed immediately before and behind a process's
 * phase functions. Both arrays live under one critical section owned by the
 * control block, independent of the exclusive-access lock.
 *
 * Slots are only ever marked empty; the backing storage never shrinks, so a
 * run in progress never sees the array move.
 */

use crate::collab::CompiledExpression;
use crate::core::limits::EQUATION_GROW_CHUNK;
use crate::core::Pid;
use parking_lot::Mutex;
use std::sync::Arc;

/// Which array an expression belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookSide {
    Before,
    Behind,
}

/// Removal selector: one ordinal or everything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EquationSelector {
    Nr(i32),
    All,
}

impl EquationSelector {
    #[inline]
    fn matches(self, nr: i32) -> bool {
        match self {
            EquationSelector::All => true,
            EquationSelector::Nr(n) => n == nr,
        }
    }
}

struct Slot {
    nr: i32,
    expr: Arc<dyn CompiledExpression>,
}

#[derive(Default)]
struct Slots {
    before: Vec<Option<Slot>>,
    behind: Vec<Option<Slot>>,
}

impl Slots {
    fn side(&mut self, side: HookSide) -> &mut Vec<Option<Slot>> {
        match side {
            HookSide::Before => &mut self.before,
            HookSide::Behind => &mut self.behind,
        }
    }
}

/// Before/behind expression arrays of one process
#[derive(Default)]
pub struct EquationHooks {
    slots: Mutex<Slots>,
}

impl EquationHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place `expr` into the first empty slot, growing by a fixed chunk when full
    pub fn add(&self, side: HookSide, nr: i32, expr: Arc<dyn CompiledExpression>) {
        let mut slots = self.slots.lock();
        let array = slots.side(side);
        let index = match array.iter().position(Option::is_none) {
            Some(index) => index,
            None => {
                let index = array.len();
                array.resize_with(index + EQUATION_GROW_CHUNK, || None);
                index
            }
        };
        array[index] = Some(Slot { nr, expr });
    }

    /// Release matching expressions and compact the survivors forward
    ///
    /// Returns the number of released expressions.
    pub fn remove(&self, side: HookSide, selector: EquationSelector, pid: Pid) -> usize {
        let mut slots = self.slots.lock();
        let array = slots.side(side);
        let mut kept = 0;
        let mut released = 0;
        for index in 0..array.len() {
            let Some(slot) = array[index].take() else {
                break;
            };
            if selector.matches(slot.nr) {
                slot.expr.release(pid);
                released += 1;
            } else {
                array[kept] = Some(slot);
                kept += 1;
            }
        }
        released
    }

    /// Release every expression on both sides
    pub fn remove_all(&self, pid: Pid) -> usize {
        self.remove(HookSide::Before, EquationSelector::All, pid)
            + self.remove(HookSide::Behind, EquationSelector::All, pid)
    }

    /// Execute slots in order up to the first empty one
    pub fn run(&self, side: HookSide, pid: Pid) {
        let mut slots = self.slots.lock();
        for slot in slots.side(side).iter() {
            match slot {
                Some(slot) => slot.expr.execute(pid),
                None => break,
            }
        }
    }

    pub fn len(&self, side: HookSide) -> usize {
        let mut slots = self.slots.lock();
        slots.side(side).iter().take_while(|s| s.is_some()).count()
    }

    /// Allocated slots, used or not
    pub fn capacity(&self, side: HookSide) -> usize {
        self.slots.lock().side(side).len()
    }
}

impl std::fmt::Debug for EquationHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EquationHooks")
            .field("before", &self.len(HookSide::Before))
            .field("behind", &self.len(HookSide::Behind))
            .finish()
    }
}
