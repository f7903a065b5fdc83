use crate::{PKError, PKTick};
use crate::config::MAX_DELAY;
use crate::kernel::PKKernel;
use crate::port::PKPort;

//

/// Handle of a kernel-owned list of tasks waiting for an event, highest priority first.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PKEventList(u8);

/// Snapshot of the tick taken when a bounded wait began.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PKTimeOut
{
    overflows: u32,
    entered_at: PKTick
}

impl<P: PKPort> PKKernel<P>
{
    pub(crate) fn create_event_list(&mut self) -> Result<PKEventList, PKError>
    {
        self.enter_critical();
        let i = self.qs.alloc_event();
        self.exit_critical();

        i.map(PKEventList).ok_or(PKError::NoEventList)
    }

    /// Returns the list to the pool. No task may be waiting on it.
    pub(crate) fn delete_event_list(&mut self, ev: PKEventList)
    {
        self.enter_critical();
        self.qs.free_event(ev.0);
        self.exit_critical();
    }

    /// Links the running task into `ev` by priority and blocks it for `ticks`.
    /// Runs with the scheduler suspended or inside a critical section.
    pub(crate) fn place_on_event_list(&mut self, ev: PKEventList, ticks: PKTick)
    {
        let cur = self.target_idx(None);

        self.qs.event_mut(ev.0).insert_sorted(&mut self.tasks, cur);
        self.add_current_to_delayed(ticks, true);
    }

    /// Readies the highest-priority waiter of `ev`, if any.
    /// * Returns `true` if it should run before the calling task.
    pub(crate) fn remove_from_event_list(&mut self, ev: PKEventList) -> bool
    {
        let Some(h) = self.qs.event(ev.0).head() else {
            return false;
        };

        self.qs.event_mut(ev.0).remove(&mut self.tasks, h);

        if self.suspended == 0 {
            self.qs.remove_state(&mut self.tasks, h);
            self.qs.add_to_ready(&mut self.tasks, h);
        }
        else {
            // the state item stays put until resume_all drains the pending list
            self.qs.pending_ready.insert_tail(&mut self.tasks, h);
        }

        if self.outranks_current(h, false) {
            self.yield_pending = true;
            true
        }
        else {
            false
        }
    }

    /// Blocks the running task on `ev` for at most `ticks`.
    pub(crate) fn wait_event(&mut self, ev: PKEventList, ticks: PKTick)
    {
        self.suspend_all();
        self.place_on_event_list(ev, ticks);

        if !self.resume_all() {
            self.yield_within_api();
        }
    }

    /// * Returns `true` if a waiter was readied that outranks the caller.
    pub(crate) fn signal_event(&mut self, ev: PKEventList) -> bool
    {
        self.enter_critical();
        let higher = self.remove_from_event_list(ev);
        if higher {
            self.yield_within_api();
        }
        self.exit_critical();

        higher
    }

    pub(crate) fn signal_event_from_isr(&mut self, ev: PKEventList) -> bool
    {
        let mask = self.port.raise_mask();
        let higher = self.remove_from_event_list(ev);
        self.port.restore_mask(mask);

        higher
    }

    /// Number of tasks waiting on `ev`.
    pub(crate) fn event_waiters(&self, ev: PKEventList) -> usize
    {
        self.qs.event(ev.0).len()
    }

    pub(crate) fn set_timeout_state(&mut self) -> PKTimeOut
    {
        self.enter_critical();
        let to = self.timeout_now();
        self.exit_critical();

        to
    }

    fn timeout_now(&self) -> PKTimeOut
    {
        PKTimeOut {
            overflows: self.num_overflows,
            entered_at: self.tick
        }
    }

    /// Charges the ticks elapsed since `to` against `ticks_to_wait`.
    /// * Returns `true` once the wait has timed out.
    pub(crate) fn check_for_timeout(&mut self, to: &mut PKTimeOut, ticks_to_wait: &mut PKTick) -> bool
    {
        self.enter_critical();

        let now = self.tick;
        let elapsed = now.wrapping_sub(to.entered_at);

        let timed_out = if *ticks_to_wait == MAX_DELAY {
            false
        }
        else if self.num_overflows != to.overflows && now >= to.entered_at {
            // a full wrap went by since the wait began
            *ticks_to_wait = 0;
            true
        }
        else if elapsed < *ticks_to_wait {
            *ticks_to_wait -= elapsed;
            *to = self.timeout_now();
            false
        }
        else {
            *ticks_to_wait = 0;
            true
        };

        self.exit_critical();

        timed_out
    }

    /// Makes the next tick request a switch.
    pub(crate) fn missed_yield(&mut self)
    {
        self.yield_pending = true;
    }

    #[cfg(test)]
    pub(crate) fn event_key(&self, idx: crate::PKTaskIdx) -> u32
    {
        use crate::list::{PKItemKind, PKItemOwner};

        self.tasks.item(idx, PKItemKind::Event).value
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::config::{MAX_EVENT_LISTS, MAX_PRIORITIES};
    use crate::kernel::PKTaskState;
    use crate::kernel::testkit::*;

    #[test]
    fn test_highest_waiter_first()
    {
        let mut bed = PKTestBed::new(6);
        let a = bed.spawn("a", 3);
        let b = bed.spawn("b", 2);
        let c = bed.spawn("c", 1);
        bed.start();

        let ev = bed.pk.create_event_list().unwrap();

        // a, then b, then c block in turn
        for expect in [a, b, c] {
            assert_eq!(bed.running(), expect);
            bed.pk.wait_event(ev, MAX_DELAY);
            bed.dispatch();
        }
        assert_eq!(bed.running(), bed.idle());
        assert_eq!(bed.pk.event_waiters(ev), 3);
        assert_eq!(bed.pk.event_key(a.index()), (MAX_PRIORITIES - 3) as u32);

        assert!(bed.pk.signal_event(ev));
        bed.dispatch();
        assert_eq!(bed.running(), a);
        assert_eq!(bed.pk.task_state(b), PKTaskState::Blocked);

        assert!(!bed.pk.signal_event(ev));
        assert_eq!(bed.pk.task_state(b), PKTaskState::Ready);
        assert_eq!(bed.pk.event_waiters(ev), 1);
    }

    #[test]
    fn test_signal_equal_priority_does_not_preempt()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.spawn("b", 1);
        bed.start();

        let ev = bed.pk.create_event_list().unwrap();
        let waiter = bed.running();
        bed.pk.wait_event(ev, MAX_DELAY);
        bed.dispatch();
        assert_ne!(bed.running(), waiter);

        assert!(!bed.pk.signal_event(ev));
        assert!(!bed.dispatch());
        assert_eq!(bed.pk.task_state(waiter), PKTaskState::Ready);
    }

    #[test]
    fn test_timeout_unlinks_event()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        bed.start();

        let ev = bed.pk.create_event_list().unwrap();
        bed.pk.wait_event(ev, 4);
        bed.dispatch();

        bed.ticks(4);
        assert_eq!(bed.running(), a);
        assert_eq!(bed.pk.event_waiters(ev), 0);

        assert!(!bed.pk.signal_event(ev));
        bed.pk.delete_event_list(ev);
    }

    #[test]
    fn test_signal_from_isr_while_suspended_all()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();

        let ev = bed.pk.create_event_list().unwrap();
        bed.pk.wait_event(ev, 20);
        bed.dispatch();
        assert_eq!(bed.running(), lo);

        bed.pk.suspend_all();
        bed.pk.port.set_in_isr(true);
        assert!(bed.pk.signal_event_from_isr(ev));
        bed.pk.port.set_in_isr(false);
        assert_eq!(bed.running(), lo);

        assert!(bed.pk.resume_all());
        bed.dispatch();
        assert_eq!(bed.running(), hi);

        // no second wake at the old deadline
        bed.ticks(25);
        assert_eq!(bed.running(), hi);
        assert_eq!(bed.pk.event_waiters(ev), 0);
    }

    #[test]
    fn test_event_pool_exhausted()
    {
        let mut bed = PKTestBed::new(2);

        for _ in 0..MAX_EVENT_LISTS {
            bed.pk.create_event_list().unwrap();
        }
        assert_eq!(bed.pk.create_event_list(), Err(PKError::NoEventList));
    }

    #[test]
    fn test_check_for_timeout()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.start();

        let mut to = bed.pk.set_timeout_state();
        let mut left = 10;

        bed.ticks(4);
        assert!(!bed.pk.check_for_timeout(&mut to, &mut left));
        assert_eq!(left, 6);

        bed.ticks(6);
        assert!(bed.pk.check_for_timeout(&mut to, &mut left));
        assert_eq!(left, 0);

        let mut forever = MAX_DELAY;
        assert!(!bed.pk.check_for_timeout(&mut to, &mut forever));
    }

    #[test]
    fn test_check_for_timeout_across_wrap()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.start();

        bed.pk.force_tick(u32::MAX - 1);
        let mut to = bed.pk.set_timeout_state();
        let mut left = 5;

        bed.ticks(3);
        assert!(!bed.pk.check_for_timeout(&mut to, &mut left));
        assert_eq!(left, 2);

        // a full wrap is always a timeout
        let mut to = bed.pk.set_timeout_state();
        let mut left = 100;
        bed.pk.num_overflows += 1;
        bed.pk.force_tick(to.entered_at + 1);
        assert!(bed.pk.check_for_timeout(&mut to, &mut left));
    }

    #[test]
    fn test_missed_yield_forces_switch_on_tick()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.start();

        bed.pk.missed_yield();
        bed.pk.port.set_in_isr(true);
        assert!(bed.pk.tick_interrupt());
        bed.pk.port.set_in_isr(false);
    }
}
