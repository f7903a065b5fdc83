use crate::{bk_assert, PKTaskIdx, PKPriority};
use crate::config::{MAX_PRIORITIES, MAX_EVENT_LISTS};
use crate::list::{PKList, PKListId, PKItemKind, PKItemOwner};
use crate::task::PKTaskTable;

//

/// Every list a task can be linked into.
pub(crate) struct PKQueueSet
{
    ready: [PKList; MAX_PRIORITIES],
    ready_bits: u64, // bit p set iff ready[p] is non-empty
    delayed: [PKList; 2],
    active: usize,
    pub(crate) pending_ready: PKList,
    pub(crate) suspended: PKList,
    pub(crate) terminated: PKList,
    events: [PKList; MAX_EVENT_LISTS],
    events_used: u32
}

impl PKQueueSet
{
    pub(crate) fn new() -> PKQueueSet
    {
        PKQueueSet {
            ready: core::array::from_fn(|p| PKList::new(PKListId::Ready(p as u8), PKItemKind::State)),
            ready_bits: 0,
            delayed: core::array::from_fn(|i| PKList::new(PKListId::Delayed(i as u8), PKItemKind::State)),
            active: 0,
            // a task parked here keeps its state item where it was
            pending_ready: PKList::new(PKListId::PendingReady, PKItemKind::Event),
            suspended: PKList::new(PKListId::Suspended, PKItemKind::State),
            terminated: PKList::new(PKListId::Terminated, PKItemKind::State),
            events: core::array::from_fn(|i| PKList::new(PKListId::Event(i as u8), PKItemKind::Event)),
            events_used: 0
        }
    }

    // ----- ----- Ready lists ----- ----- //

    pub(crate) fn add_to_ready(&mut self, tasks: &mut PKTaskTable, idx: PKTaskIdx)
    {
        let pri = tasks.tcb(idx).priority;

        self.ready[pri as usize].insert_tail(tasks, idx);
        self.ready_bits |= 1 << pri;
    }

    pub(crate) fn ready(&self, pri: PKPriority) -> &PKList
    {
        &self.ready[pri as usize]
    }

    pub(crate) fn has_ready(&self) -> bool
    {
        self.ready_bits != 0
    }

    pub(crate) fn top_ready_priority(&self) -> PKPriority
    {
        bk_assert!(self.ready_bits != 0, "no ready task");

        (63 - self.ready_bits.leading_zeros()) as PKPriority
    }

    /// Advances round-robin within the highest non-empty priority.
    pub(crate) fn next_ready(&mut self, tasks: &PKTaskTable) -> Option<PKTaskIdx>
    {
        if !self.has_ready() {
            return None;
        }

        let top = self.top_ready_priority();

        self.ready[top as usize].next_owner(tasks)
    }

    // ----- ----- Delayed lists ----- ----- //

    pub(crate) fn delayed(&self) -> &PKList
    {
        &self.delayed[self.active]
    }

    pub(crate) fn delayed_mut(&mut self) -> &mut PKList
    {
        &mut self.delayed[self.active]
    }

    pub(crate) fn overflow_mut(&mut self) -> &mut PKList
    {
        &mut self.delayed[self.active ^ 1]
    }

    pub(crate) fn swap_delayed(&mut self)
    {
        bk_assert!(self.delayed().is_empty(), "delayed list not drained at wraparound");

        self.active ^= 1;
    }

    // ----- ----- Any list ----- ----- //

    fn list_mut(&mut self, id: PKListId) -> &mut PKList
    {
        match id {
            PKListId::Ready(p) => &mut self.ready[p as usize],
            PKListId::Delayed(i) => &mut self.delayed[i as usize],
            PKListId::PendingReady => &mut self.pending_ready,
            PKListId::Suspended => &mut self.suspended,
            PKListId::Terminated => &mut self.terminated,
            PKListId::Event(i) => &mut self.events[i as usize]
        }
    }

    /// Unlinks the state item from whichever list holds it.
    pub(crate) fn remove_state(&mut self, tasks: &mut PKTaskTable, idx: PKTaskIdx)
    {
        if let Some(id) = tasks.item(idx, PKItemKind::State).container() {
            let left = self.list_mut(id).remove(tasks, idx);

            if let PKListId::Ready(p) = id {
                if left == 0 {
                    self.ready_bits &= !(1 << p);
                }
            }
        }
    }

    /// Unlinks the event item, if linked.
    pub(crate) fn remove_event(&mut self, tasks: &mut PKTaskTable, idx: PKTaskIdx)
    {
        if let Some(id) = tasks.item(idx, PKItemKind::Event).container() {
            self.list_mut(id).remove(tasks, idx);
        }
    }

    // ----- ----- Event lists ----- ----- //

    pub(crate) fn alloc_event(&mut self) -> Option<u8>
    {
        let i = (0..MAX_EVENT_LISTS).find(|i| self.events_used & (1 << i) == 0)?;

        self.events_used |= 1 << i;
        Some(i as u8)
    }

    pub(crate) fn free_event(&mut self, i: u8)
    {
        bk_assert!(self.events_used & (1 << i) != 0, "event list {} not in use", i);
        bk_assert!(self.events[i as usize].is_empty(), "event list {} still has waiters", i);

        self.events_used &= !(1 << i);
    }

    pub(crate) fn event(&self, i: u8) -> &PKList
    {
        bk_assert!(self.events_used & (1 << i) != 0, "event list {} not in use", i);

        &self.events[i as usize]
    }

    pub(crate) fn event_mut(&mut self, i: u8) -> &mut PKList
    {
        bk_assert!(self.events_used & (1 << i) != 0, "event list {} not in use", i);

        &mut self.events[i as usize]
    }
}
