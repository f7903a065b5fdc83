use crate::{bk_assert, PKTaskIdx, PKPriority};
use crate::bkptpanic::BKUnwrap;
use crate::config::{MAX_TASK_NAME_LEN, NOTIFICATION_ARRAY_ENTRIES};
use crate::list::{PKItem, PKItemKind, PKItemOwner};
use crate::memory::PKRawArray;
use crate::notify::{PKNotifySlot, PKNotifyState};

//

/// Pattern written over a fresh stack, used to detect overflow and measure usage.
pub(crate) const STACK_FILL_WORD: usize = usize::MAX / 0xff * 0xa5;

/// Handle of a task.
///
/// A handle stays bound to the task it was created for. Once that task is
/// reclaimed its slot may be reused, and the stale handle is rejected.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PKTaskId
{
    idx: PKTaskIdx,
    gen: u16
}

impl PKTaskId
{
    /// Slot index of the task, `0` to `max_tasks - 1`.
    pub fn index(&self) -> PKTaskIdx
    {
        self.idx
    }
}

//

/// Task control block. `sp` stays the first field for the context switch.
#[repr(C)]
pub(crate) struct PKTcb
{
    pub(crate) sp: *mut usize,
    pub(crate) state_item: PKItem,
    pub(crate) event_item: PKItem,
    pub(crate) priority: PKPriority,
    pub(crate) base_priority: PKPriority,
    pub(crate) stack: PKRawArray<usize>,
    pub(crate) name: [u8; MAX_TASK_NAME_LEN],
    pub(crate) notify: [PKNotifySlot; NOTIFICATION_ARRAY_ENTRIES],
    pub(crate) deleted: bool
}

impl PKTcb
{
    pub(crate) fn new(name: &str, priority: PKPriority, stack: PKRawArray<usize>) -> PKTcb
    {
        PKTcb {
            sp: core::ptr::null_mut(),
            state_item: PKItem::new(),
            event_item: PKItem::new(),
            priority,
            base_priority: priority,
            stack,
            name: copy_name(name),
            notify: [PKNotifySlot::new(); NOTIFICATION_ARRAY_ENTRIES],
            deleted: false
        }
    }

    pub(crate) fn name(&self) -> &str
    {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAX_TASK_NAME_LEN);

        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub(crate) fn stop_waiting_notifications(&mut self)
    {
        for slot in self.notify.iter_mut() {
            if slot.state == PKNotifyState::Waiting {
                slot.state = PKNotifyState::NotWaiting;
            }
        }
    }

    pub(crate) fn fill_stack(&mut self)
    {
        for i in 0..self.stack.len() {
            self.stack.write(i, STACK_FILL_WORD);
        }
    }

    /// Holds while `sp` is within the stack and its lowest word still carries the fill pattern.
    pub(crate) fn stack_intact(&self) -> bool
    {
        self.sp >= self.stack.head() &&
        self.sp <= self.stack.tail() &&
        self.stack.len() > 0 &&
        self.stack.read_volatile(0usize) == STACK_FILL_WORD
    }

    /// Number of words from the bottom of the stack never written so far.
    pub(crate) fn stack_unused(&self) -> usize
    {
        (0..self.stack.len())
            .take_while(|&i| self.stack.read_volatile(i) == STACK_FILL_WORD)
            .count()
    }
}

fn copy_name(name: &str) -> [u8; MAX_TASK_NAME_LEN]
{
    let mut buf = [0; MAX_TASK_NAME_LEN];

    let mut n = name.len().min(MAX_TASK_NAME_LEN - 1);
    while !name.is_char_boundary(n) {
        n -= 1;
    }

    buf[..n].copy_from_slice(&name.as_bytes()[..n]);
    buf
}

//

pub(crate) struct PKSlot
{
    gen: u16,
    tcb: Option<PKTcb>
}

/// Arena of task slots addressed by index.
pub(crate) struct PKTaskTable
{
    slots: PKRawArray<PKSlot>
}

impl PKTaskTable
{
    pub(crate) fn new(mut slots: PKRawArray<PKSlot>) -> PKTaskTable
    {
        for i in 0..slots.len() {
            slots.write(i, PKSlot {gen: 0, tcb: None});
        }

        PKTaskTable {
            slots
        }
    }

    pub(crate) fn vacant(&self) -> Option<PKTaskIdx>
    {
        (0..self.slots.len())
            .find(|&i| self.slots.refer(i).tcb.is_none())
            .map(|i| i as PKTaskIdx)
    }

    pub(crate) fn insert(&mut self, idx: PKTaskIdx, tcb: PKTcb) -> PKTaskId
    {
        let slot = self.slots.refer_mut(idx);
        bk_assert!(slot.tcb.is_none(), "slot {}: double registration", idx);

        slot.tcb = Some(tcb);

        PKTaskId {
            idx,
            gen: slot.gen
        }
    }

    /// Empties a slot and invalidates every handle to it.
    pub(crate) fn take(&mut self, idx: PKTaskIdx) -> PKTcb
    {
        let slot = self.slots.refer_mut(idx);
        slot.gen = slot.gen.wrapping_add(1);

        slot.tcb.take().bk_unwrap()
    }

    pub(crate) fn is_live(&self, id: PKTaskId) -> bool
    {
        (id.idx as usize) < self.slots.len() && {
            let slot = self.slots.refer(id.idx);
            slot.gen == id.gen && slot.tcb.is_some()
        }
    }

    pub(crate) fn resolve(&self, id: PKTaskId) -> PKTaskIdx
    {
        bk_assert!(self.is_live(id), "stale task handle {:?}", id);

        id.idx
    }

    pub(crate) fn id_of(&self, idx: PKTaskIdx) -> PKTaskId
    {
        PKTaskId {
            idx,
            gen: self.slots.refer(idx).gen
        }
    }

    pub(crate) fn tcb(&self, idx: PKTaskIdx) -> &PKTcb
    {
        self.slots.refer(idx).tcb.as_ref().bk_unwrap()
    }

    pub(crate) fn tcb_mut(&mut self, idx: PKTaskIdx) -> &mut PKTcb
    {
        self.slots.refer_mut(idx).tcb.as_mut().bk_unwrap()
    }
}

impl PKItemOwner for PKTaskTable
{
    fn item(&self, idx: PKTaskIdx, kind: PKItemKind) -> &PKItem
    {
        let tcb = self.tcb(idx);

        match kind {
            PKItemKind::State => &tcb.state_item,
            PKItemKind::Event => &tcb.event_item
        }
    }

    fn item_mut(&mut self, idx: PKTaskIdx, kind: PKItemKind) -> &mut PKItem
    {
        let tcb = self.tcb_mut(idx);

        match kind {
            PKItemKind::State => &mut tcb.state_item,
            PKItemKind::Event => &mut tcb.event_item
        }
    }
}
