use crate::{bk_assert, PKError, PKTaskId, PKTick};
use crate::config::NOTIFICATION_ARRAY_ENTRIES;
use crate::kernel::PKKernel;
use crate::port::PKPort;

//

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PKNotifyState
{
    NotWaiting,
    Waiting,
    Received
}

/// How a notification updates the value of the target slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PKNotifyAction
{
    /// Only marks the slot as notified.
    NoAction,
    /// ORs the bits into the value.
    SetBits(u32),
    Increment,
    SetValueWithOverwrite(u32),
    /// Refused with `PKError::AlreadyNotified` while a previous notification is pending.
    /// The value is left untouched then, so `notify_value_clear` with no bits reads it.
    SetValueWithoutOverwrite(u32)
}

/// Outcome of a notification wait.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PKNotifyWait
{
    /// Value of the slot before the bits to clear on exit were cleared.
    pub value: u32,
    /// `false` if the wait timed out.
    pub signaled: bool
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PKNotifySlot
{
    pub(crate) value: u32,
    pub(crate) state: PKNotifyState
}

impl PKNotifySlot
{
    pub(crate) const fn new() -> PKNotifySlot
    {
        PKNotifySlot {
            value: 0,
            state: PKNotifyState::NotWaiting
        }
    }

    /// Marks the slot as notified and returns the value before the action.
    fn apply(&mut self, action: PKNotifyAction) -> Result<u32, PKError>
    {
        let prev = self.value;
        let prior_state = self.state;

        self.state = PKNotifyState::Received;

        match action {
            PKNotifyAction::NoAction => {}
            PKNotifyAction::SetBits(bits) => self.value |= bits,
            PKNotifyAction::Increment => self.value = self.value.wrapping_add(1),
            PKNotifyAction::SetValueWithOverwrite(v) => self.value = v,
            PKNotifyAction::SetValueWithoutOverwrite(v) => {
                if prior_state == PKNotifyState::Received {
                    return Err(PKError::AlreadyNotified);
                }
                self.value = v;
            }
        }

        Ok(prev)
    }
}

fn check_index(index: usize)
{
    bk_assert!(index < NOTIFICATION_ARRAY_ENTRIES, "notification index {} out of range", index);
}

impl<P: PKPort> PKKernel<P>
{
    // ----- ----- Task context ----- ----- //

    /// * Returns the value before the action.
    pub(crate) fn notify(&mut self, target: PKTaskId, index: usize, action: PKNotifyAction) -> Result<u32, PKError>
    {
        check_index(index);

        self.enter_critical();

        let idx = self.tasks.resolve(target);
        let slot = &mut self.tasks.tcb_mut(idx).notify[index];
        let prior_state = slot.state;
        let res = slot.apply(action);

        if prior_state == PKNotifyState::Waiting {
            self.qs.remove_state(&mut self.tasks, idx);
            self.qs.add_to_ready(&mut self.tasks, idx);

            bk_assert!(self.tasks.tcb(idx).event_item.container().is_none());

            if self.outranks_current(idx, false) {
                self.yield_within_api();
            }
        }

        self.exit_critical();

        res
    }

    /// * Returns the value before the action, and `true` if the notified task
    ///   should run before the interrupted one.
    pub(crate) fn notify_from_isr(&mut self, target: PKTaskId, index: usize, action: PKNotifyAction) -> (Result<u32, PKError>, bool)
    {
        check_index(index);

        let mut woken = false;

        let mask = self.port.raise_mask();

        let idx = self.tasks.resolve(target);
        let slot = &mut self.tasks.tcb_mut(idx).notify[index];
        let prior_state = slot.state;
        let res = slot.apply(action);

        if prior_state == PKNotifyState::Waiting {
            bk_assert!(self.tasks.tcb(idx).event_item.container().is_none());

            if self.suspended == 0 {
                self.qs.remove_state(&mut self.tasks, idx);
                self.qs.add_to_ready(&mut self.tasks, idx);
            }
            else {
                self.qs.pending_ready.insert_tail(&mut self.tasks, idx);
            }

            if self.outranks_current(idx, false) {
                woken = true;
                self.yield_pending = true;
            }
        }

        self.port.restore_mask(mask);

        (res, woken)
    }

    /// First half of a wait. Returns `true` if the running task blocked.
    pub(crate) fn notify_wait_begin(&mut self, index: usize, clear_on_entry: u32, ticks: PKTick) -> bool
    {
        check_index(index);

        let mut blocked = false;

        self.enter_critical();

        let cur = self.target_idx(None);
        let slot = &mut self.tasks.tcb_mut(cur).notify[index];

        if slot.state != PKNotifyState::Received {
            slot.value &= !clear_on_entry;
            slot.state = PKNotifyState::Waiting;

            if ticks > 0 {
                self.add_current_to_delayed(ticks, true);
                self.yield_within_api();
                blocked = true;
            }
        }

        self.exit_critical();

        blocked
    }

    /// Second half of a wait, run once the task is scheduled again.
    pub(crate) fn notify_wait_end(&mut self, index: usize, clear_on_exit: u32) -> PKNotifyWait
    {
        check_index(index);

        self.enter_critical();

        let cur = self.target_idx(None);
        let slot = &mut self.tasks.tcb_mut(cur).notify[index];

        let value = slot.value;
        let signaled = slot.state == PKNotifyState::Received;

        if signaled {
            slot.value &= !clear_on_exit;
        }
        slot.state = PKNotifyState::NotWaiting;

        self.exit_critical();

        PKNotifyWait {
            value,
            signaled
        }
    }

    /// First half of a counting take. Returns `true` if the running task blocked.
    pub(crate) fn notify_take_begin(&mut self, index: usize, ticks: PKTick) -> bool
    {
        check_index(index);

        let mut blocked = false;

        self.enter_critical();

        let cur = self.target_idx(None);
        let slot = &mut self.tasks.tcb_mut(cur).notify[index];

        if slot.value == 0 {
            slot.state = PKNotifyState::Waiting;

            if ticks > 0 {
                self.add_current_to_delayed(ticks, true);
                self.yield_within_api();
                blocked = true;
            }
        }

        self.exit_critical();

        blocked
    }

    /// Second half of a counting take.
    /// * Returns the count before it was decremented or cleared.
    pub(crate) fn notify_take_end(&mut self, index: usize, clear_on_exit: bool) -> u32
    {
        check_index(index);

        self.enter_critical();

        let cur = self.target_idx(None);
        let slot = &mut self.tasks.tcb_mut(cur).notify[index];

        let value = slot.value;

        if value != 0 {
            slot.value = if clear_on_exit { 0 } else { value - 1 };
        }
        slot.state = PKNotifyState::NotWaiting;

        self.exit_critical();

        value
    }

    /// Drops a pending notification.
    /// * Returns `true` if one was pending.
    pub(crate) fn notify_state_clear(&mut self, target: Option<PKTaskId>, index: usize) -> bool
    {
        check_index(index);

        self.enter_critical();

        let idx = self.target_idx(target);
        let slot = &mut self.tasks.tcb_mut(idx).notify[index];

        let was_received = slot.state == PKNotifyState::Received;
        if was_received {
            slot.state = PKNotifyState::NotWaiting;
        }

        self.exit_critical();

        was_received
    }

    /// Clears `bits` of the value.
    /// * Returns the value before clearing.
    pub(crate) fn notify_value_clear(&mut self, target: Option<PKTaskId>, index: usize, bits: u32) -> u32
    {
        check_index(index);

        self.enter_critical();

        let idx = self.target_idx(target);
        let slot = &mut self.tasks.tcb_mut(idx).notify[index];

        let prev = slot.value;
        slot.value &= !bits;

        self.exit_critical();

        prev
    }
}
