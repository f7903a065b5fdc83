use core::sync::atomic::{compiler_fence, Ordering};

use crate::{bk_assert, bk_panic, PKError, PKTaskId, PKTaskIdx, PKPriority, PKTick};
use crate::bkptpanic::BKUnwrap;
use crate::config::*;
use crate::critical::PKCritical;
use crate::list::{PKItemKind, PKItemOwner, PKListId};
use crate::memory::PKHeap;
use crate::notify::PKNotifyState;
use crate::port::{PKPort, INITIAL_FRAME_WORDS};
use crate::qset::PKQueueSet;
use crate::task::{PKTaskTable, PKTcb};

//

/// Task entry point. It receives the parameter given at creation and must never return.
pub type PKTaskFn = extern "C" fn(usize);

/// State of a task as observed from outside.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PKTaskState
{
    Running,
    Ready,
    Blocked,
    Suspended,
    Deleted
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PKSchedulerState
{
    NotStarted,
    Running,
    Suspended
}

/// Return address of every task. Reaching it means a task function returned.
pub(crate) extern "C" fn task_exit_trap() -> !
{
    bk_panic!("task function returned")
}

//

pub(crate) struct PKKernel<P: PKPort>
{
    pub(crate) port: P,
    pub(crate) heap: PKHeap,
    pub(crate) tasks: PKTaskTable,
    pub(crate) qs: PKQueueSet,
    pub(crate) critical: PKCritical,
    pub(crate) current: Option<PKTaskIdx>,
    idle: Option<PKTaskIdx>,
    num_tasks: usize,
    pub(crate) tick: PKTick,
    pub(crate) num_overflows: u32,
    next_unblock: PKTick,
    pended_ticks: u32,
    pub(crate) running: bool,
    pub(crate) suspended: u32,
    pub(crate) yield_pending: bool,
    deleted_waiting_cleanup: usize
}

impl<P: PKPort> PKKernel<P>
{
    // ----- ----- Main context ----- ----- //

    pub(crate) fn new(port: P, mut heap: PKHeap, max_tasks: usize) -> Result<PKKernel<P>, PKError>
    {
        bk_assert!(max_tasks <= PKTaskIdx::MAX as usize, "{} tasks: too many", max_tasks);

        let tasks = PKTaskTable::new(heap.array(max_tasks)?);

        Ok(PKKernel {
            port,
            heap,
            tasks,
            qs: PKQueueSet::new(),
            critical: PKCritical::new(),
            current: None,
            idle: None,
            num_tasks: 0,
            tick: INITIAL_TICK_COUNT,
            num_overflows: 0,
            next_unblock: MAX_DELAY,
            pended_ticks: 0,
            running: false,
            suspended: 0,
            yield_pending: false,
            deleted_waiting_cleanup: 0
        })
    }

    /// Creates the idle task and prepares the first switch. Interrupts stay masked
    /// until the first task is launched.
    pub(crate) fn start(&mut self, idle_entry: PKTaskFn)
    {
        validate_interrupt_priorities(LIBRARY_LOWEST_INTERRUPT_PRIORITY, LIBRARY_MAX_SYSCALL_INTERRUPT_PRIORITY);

        match self.create_task(idle_entry, IDLE_TASK_NAME, MINIMAL_STACK_SIZE, 0, IDLE_PRIORITY) {
            Ok(id) => self.idle = Some(id.index()),
            Err(e) => bk_panic!("idle task: {}", e)
        }

        self.port.raise_mask();

        self.next_unblock = MAX_DELAY;
        self.running = true;
        self.tick = INITIAL_TICK_COUNT;
        self.critical.reset();

        log::info!("scheduler started with {} tasks, {} bytes free", self.num_tasks, self.heap.free_bytes());
    }

    // ----- ----- Task lifecycle ----- ----- //

    pub(crate) fn create_task(&mut self, entry: PKTaskFn, name: &str, stack_len: usize, param: usize, priority: PKPriority) -> Result<PKTaskId, PKError>
    {
        bk_assert!(stack_len >= INITIAL_FRAME_WORDS + 2, "{}: stack shortage", name);

        let priority = priority.min((MAX_PRIORITIES - 1) as PKPriority);

        self.suspend_all();
        let claimed = self.claim_task_slot(entry, name, stack_len, param, priority);
        self.resume_all();

        let (idx, id) = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                log::warn!("{}: cannot create task: {}", name, e);
                return Err(e);
            }
        };

        log::debug!("{}: created at slot {} with priority {}", name, idx, priority);

        self.add_new_task_to_ready_list(idx);

        Ok(id)
    }

    /// Takes a free slot and a stack, and registers the new task in the slot.
    /// The scheduler must be suspended, so that no other task sees the slot as free.
    fn claim_task_slot(&mut self, entry: PKTaskFn, name: &str, stack_len: usize, param: usize, priority: PKPriority) -> Result<(PKTaskIdx, PKTaskId), PKError>
    {
        bk_assert!(self.suspended > 0);

        let idx = self.tasks.vacant().ok_or(PKError::Alloc)?;
        let stack = self.heap.array(stack_len)?;

        let mut tcb = PKTcb::new(name, priority, stack);

        tcb.fill_stack();
        tcb.event_item.value = (MAX_PRIORITIES - priority as usize) as u32;
        tcb.sp = self.port.init_stack(tcb.stack.tail(), entry as usize, param, task_exit_trap as usize);

        Ok((idx, self.tasks.insert(idx, tcb)))
    }

    fn add_new_task_to_ready_list(&mut self, idx: PKTaskIdx)
    {
        let priority = self.tasks.tcb(idx).priority;

        self.enter_critical();

        self.num_tasks += 1;

        match self.current {
            None => self.current = Some(idx),
            Some(cur) => {
                // before start, the highest priority created last runs first
                if !self.running && self.tasks.tcb(cur).priority <= priority {
                    self.current = Some(idx);
                }
            }
        }

        self.qs.add_to_ready(&mut self.tasks, idx);

        self.exit_critical();

        if self.running && self.current_priority().map_or(false, |cur| priority > cur) {
            self.yield_within_api();
        }
    }

    /// Moves a task to the termination list. Its memory is released by `housekeeping`.
    pub(crate) fn delete_task(&mut self, target: Option<PKTaskId>)
    {
        self.enter_critical();

        let Some(idx) = self.alive_idx(target) else {
            self.exit_critical();
            return;
        };
        bk_assert!(Some(idx) != self.idle, "idle task cannot be deleted");

        self.qs.remove_state(&mut self.tasks, idx);
        self.qs.remove_event(&mut self.tasks, idx);

        self.qs.terminated.insert_tail(&mut self.tasks, idx);
        self.deleted_waiting_cleanup += 1;

        let tcb = self.tasks.tcb_mut(idx);
        tcb.deleted = true;
        tcb.stop_waiting_notifications();

        if self.running {
            self.reset_next_unblock_time();
        }

        self.exit_critical();

        log::debug!("{}: deleted", self.tasks.tcb(idx).name());

        if Some(idx) == self.current {
            if self.running {
                bk_assert!(self.suspended == 0, "deleting the running task while the scheduler is suspended");
                self.yield_within_api();
            }
            else {
                self.reselect_before_start();
            }
        }
    }

    /// Reclaims every terminated task that no longer runs on its own stack.
    /// * Returns the number of tasks reclaimed.
    pub(crate) fn housekeeping(&mut self) -> usize
    {
        let mut reclaimed = 0;

        while self.deleted_waiting_cleanup > 0 {
            self.enter_critical();

            let cur = self.current;
            let victim = self.qs.terminated.iter(&self.tasks).find(|&i| Some(i) != cur);

            if let Some(v) = victim {
                self.qs.terminated.remove(&mut self.tasks, v);
                self.deleted_waiting_cleanup -= 1;
                self.num_tasks -= 1;
            }

            self.exit_critical();

            let Some(v) = victim else { break };

            log::debug!("{}: reclaimed slot {}", self.tasks.tcb(v).name(), v);

            self.suspend_all();
            let tcb = self.tasks.take(v);
            self.heap.release(tcb.stack);
            self.resume_all();

            reclaimed += 1;
        }

        reclaimed
    }

    /// One pass of the idle task body.
    pub(crate) fn idle_step(&mut self)
    {
        self.housekeeping();

        if IDLE_SHOULD_YIELD && self.qs.ready(IDLE_PRIORITY).len() > 1 {
            self.yield_within_api();
        }
        else {
            self.port.wait_for_interrupt();
        }
    }

    // ----- ----- Interrupt context ----- ----- //

    /// Called by the context-switch exception with the stack pointer of the
    /// outgoing task. Returns the stack pointer of the task to run.
    pub(crate) fn save_and_switch(&mut self, sp: *mut usize) -> *mut usize
    {
        let mask = self.port.raise_mask();

        if let Some(cur) = self.current {
            self.tasks.tcb_mut(cur).sp = sp;
        }

        self.switch_context();

        let next = self.tasks.tcb(self.current.bk_unwrap()).sp;

        self.port.restore_mask(mask);

        next
    }

    /// Called once by the launch exception. Returns the stack pointer of the first task.
    pub(crate) fn launch_context(&mut self) -> *mut usize
    {
        self.port.raise_mask();

        self.select_highest();
        let next = self.tasks.tcb(self.current.bk_unwrap()).sp;

        self.port.restore_mask(0);

        next
    }

    pub(crate) fn switch_context(&mut self)
    {
        if self.suspended > 0 {
            self.yield_pending = true;
            return;
        }

        self.yield_pending = false;

        if CHECK_FOR_STACK_OVERFLOW {
            if let Some(cur) = self.current {
                let tcb = self.tasks.tcb(cur);
                bk_assert!(tcb.stack_intact(), "{}: stack overflow", tcb.name());
            }
        }

        self.select_highest();
    }

    fn select_highest(&mut self)
    {
        self.current = Some(self.qs.next_ready(&self.tasks).bk_unwrap());
    }

    /// Advances the tick and wakes the tasks whose delay expired.
    /// * Returns `true` if a context switch is required.
    pub(crate) fn increment_tick(&mut self) -> bool
    {
        let mut switch = false;

        if self.suspended == 0 {
            let now = self.tick.wrapping_add(1);
            self.tick = now;

            if now == 0 {
                self.switch_delayed_lists();
            }

            if now >= self.next_unblock {
                loop {
                    let head = self.qs.delayed().head();

                    let Some(h) = head else {
                        self.next_unblock = MAX_DELAY;
                        break;
                    };

                    let wake = self.tasks.item(h, PKItemKind::State).value;

                    if now < wake {
                        self.next_unblock = wake;
                        break;
                    }

                    self.qs.remove_state(&mut self.tasks, h);
                    self.qs.remove_event(&mut self.tasks, h);
                    self.qs.add_to_ready(&mut self.tasks, h);

                    if USE_PREEMPTION && self.outranks_current(h, true) {
                        switch = true;
                    }
                }
            }

            if USE_PREEMPTION && USE_TIME_SLICING {
                if let Some(cur) = self.current_priority() {
                    if self.qs.ready(cur).len() > 1 {
                        switch = true;
                    }
                }
            }
        }
        else {
            self.pended_ticks += 1;
        }

        if USE_PREEMPTION && self.yield_pending {
            switch = true;
        }

        switch
    }

    /// Periodic timer glue.
    /// * Returns `true` if a context switch was requested.
    pub(crate) fn tick_interrupt(&mut self) -> bool
    {
        let mask = self.port.raise_mask();

        let switch = self.increment_tick();
        if switch {
            self.port.pend_switch();
        }

        self.port.restore_mask(mask);

        switch
    }

    fn switch_delayed_lists(&mut self)
    {
        self.qs.swap_delayed();
        self.num_overflows += 1;
        self.reset_next_unblock_time();
    }

    pub(crate) fn reset_next_unblock_time(&mut self)
    {
        self.next_unblock = self.qs.delayed().head_value(&self.tasks).unwrap_or(MAX_DELAY);
    }

    // ----- ----- Task context ----- ----- //

    /// Moves the running task to the delayed list, or to the suspended list for
    /// an indefinite block.
    pub(crate) fn add_current_to_delayed(&mut self, ticks: PKTick, indefinite: bool)
    {
        let cur = self.current.bk_unwrap();
        let now = self.tick;

        self.qs.remove_state(&mut self.tasks, cur);

        if ticks == MAX_DELAY && indefinite {
            self.qs.suspended.insert_tail(&mut self.tasks, cur);
            return;
        }

        let wake = now.wrapping_add(ticks);
        self.tasks.item_mut(cur, PKItemKind::State).value = wake;

        if wake < now {
            self.qs.overflow_mut().insert_sorted(&mut self.tasks, cur);
        }
        else {
            self.qs.delayed_mut().insert_sorted(&mut self.tasks, cur);

            if wake < self.next_unblock {
                self.next_unblock = wake;
            }
        }
    }

    /// Blocks the running task for `ticks`. Zero only yields.
    pub(crate) fn delay(&mut self, ticks: PKTick)
    {
        let mut already_yielded = false;

        if ticks > 0 {
            bk_assert!(self.suspended == 0, "delay while the scheduler is suspended");

            self.suspend_all();
            self.add_current_to_delayed(ticks, false);
            already_yielded = self.resume_all();
        }

        if !already_yielded {
            self.yield_within_api();
        }
    }

    /// Blocks the running task until `*prev + inc` and advances `*prev` to it.
    /// * Returns `true` if the task actually blocked, `false` if the time already passed.
    pub(crate) fn delay_until(&mut self, prev: &mut PKTick, inc: PKTick) -> bool
    {
        bk_assert!(inc > 0, "zero increment");
        bk_assert!(self.suspended == 0, "delay while the scheduler is suspended");

        self.suspend_all();

        let now = self.tick;
        let wake = prev.wrapping_add(inc);

        let should_delay = if now < *prev {
            // the tick wrapped since prev, so only a wrapped wake time is in the future
            wake < *prev && wake > now
        }
        else {
            wake < *prev || wake > now
        };

        *prev = wake;

        if should_delay {
            self.add_current_to_delayed(wake.wrapping_sub(now), false);
        }

        if !self.resume_all() {
            self.yield_within_api();
        }

        should_delay
    }

    pub(crate) fn suspend_all(&mut self)
    {
        self.suspended += 1;
        compiler_fence(Ordering::SeqCst);
    }

    /// * Returns `true` if a context switch was already requested.
    pub(crate) fn resume_all(&mut self) -> bool
    {
        bk_assert!(self.suspended > 0, "resume_all without suspend_all");

        let mut already_yielded = false;

        self.enter_critical();

        self.suspended -= 1;

        if self.suspended == 0 && self.num_tasks > 0 {
            let mut moved = false;

            while let Some(h) = self.qs.pending_ready.head() {
                self.qs.pending_ready.remove(&mut self.tasks, h);
                self.qs.remove_state(&mut self.tasks, h);
                self.qs.add_to_ready(&mut self.tasks, h);

                if self.outranks_current(h, false) {
                    self.yield_pending = true;
                }

                moved = true;
            }

            if moved {
                self.reset_next_unblock_time();
            }

            while self.pended_ticks > 0 {
                if self.increment_tick() {
                    self.yield_pending = true;
                }
                self.pended_ticks -= 1;
            }

            if USE_PREEMPTION && self.yield_pending {
                already_yielded = true;
                self.yield_within_api();
            }
        }

        self.exit_critical();

        already_yielded
    }

    pub(crate) fn suspend(&mut self, target: Option<PKTaskId>)
    {
        self.enter_critical();

        let Some(idx) = self.alive_idx(target) else {
            self.exit_critical();
            return;
        };

        self.qs.remove_state(&mut self.tasks, idx);
        self.qs.remove_event(&mut self.tasks, idx);
        self.qs.suspended.insert_tail(&mut self.tasks, idx);

        // a suspended task no longer waits for a notification
        self.tasks.tcb_mut(idx).stop_waiting_notifications();

        if self.running {
            self.reset_next_unblock_time();
        }

        self.exit_critical();

        if Some(idx) == self.current {
            if self.running {
                bk_assert!(self.suspended == 0, "suspending the running task while the scheduler is suspended");
                self.yield_within_api();
            }
            else {
                self.reselect_before_start();
            }
        }
    }

    pub(crate) fn resume(&mut self, target: PKTaskId)
    {
        let Some(idx) = self.alive_idx(Some(target)) else { return };

        if Some(idx) == self.current {
            return;
        }

        self.enter_critical();

        if self.is_suspended_idx(idx) {
            self.qs.remove_state(&mut self.tasks, idx);
            self.qs.add_to_ready(&mut self.tasks, idx);

            if self.outranks_current(idx, true) {
                self.yield_within_api();
            }
        }

        self.exit_critical();
    }

    /// * Returns `true` if the resumed task should run before the interrupted one.
    pub(crate) fn resume_from_isr(&mut self, target: PKTaskId) -> bool
    {
        let mut yield_required = false;

        let mask = self.port.raise_mask();

        let alive = self.alive_idx(Some(target));

        if let Some(idx) = alive.filter(|&i| self.is_suspended_idx(i)) {
            if self.suspended == 0 {
                yield_required = self.outranks_current(idx, true);

                self.qs.remove_state(&mut self.tasks, idx);
                self.qs.add_to_ready(&mut self.tasks, idx);
            }
            else {
                self.qs.pending_ready.insert_tail(&mut self.tasks, idx);
            }
        }

        self.port.restore_mask(mask);

        yield_required
    }

    /// Suspended explicitly, as opposed to blocked without a timeout.
    fn is_suspended_idx(&self, idx: PKTaskIdx) -> bool
    {
        self.qs.suspended.contains(&self.tasks, idx) &&
        self.tasks.item(idx, PKItemKind::Event).container().is_none() &&
        !self.tasks.tcb(idx).notify.iter().any(|s| s.state == PKNotifyState::Waiting)
    }

    pub(crate) fn is_suspended(&self, target: PKTaskId) -> bool
    {
        self.is_suspended_idx(self.tasks.resolve(target))
    }

    pub(crate) fn priority_get(&mut self, target: Option<PKTaskId>) -> PKPriority
    {
        self.enter_critical();
        let pri = self.tasks.tcb(self.target_idx(target)).priority;
        self.exit_critical();

        pri
    }

    pub(crate) fn priority_set(&mut self, target: Option<PKTaskId>, priority: PKPriority)
    {
        let priority = priority.min((MAX_PRIORITIES - 1) as PKPriority);

        self.enter_critical();

        let Some(idx) = self.alive_idx(target) else {
            self.exit_critical();
            return;
        };
        let prior = self.tasks.tcb(idx).priority;

        if prior != priority {
            let is_current = Some(idx) == self.current;

            let yield_required = if priority > prior {
                !is_current && self.current_priority().map_or(false, |cur| priority >= cur)
            }
            else {
                is_current
            };

            let tcb = self.tasks.tcb_mut(idx);
            tcb.priority = priority;
            tcb.base_priority = priority;
            tcb.event_item.value = (MAX_PRIORITIES - priority as usize) as u32;

            if tcb.state_item.container() == Some(PKListId::Ready(prior)) {
                self.qs.remove_state(&mut self.tasks, idx);
                self.qs.add_to_ready(&mut self.tasks, idx);
            }

            if yield_required && self.running {
                self.yield_within_api();
            }
        }

        self.exit_critical();
    }

    pub(crate) fn yield_now(&mut self)
    {
        self.yield_within_api();
    }

    // ----- ----- Queries ----- ----- //

    pub(crate) fn task_state(&self, id: PKTaskId) -> PKTaskState
    {
        if !self.tasks.is_live(id) {
            return PKTaskState::Deleted;
        }

        let idx = id.index();

        if Some(idx) == self.current && !self.tasks.tcb(idx).deleted {
            return PKTaskState::Running;
        }

        match self.tasks.item(idx, PKItemKind::State).container() {
            Some(PKListId::Delayed(_)) => PKTaskState::Blocked,
            Some(PKListId::Suspended) => {
                if self.is_suspended_idx(idx) {
                    PKTaskState::Suspended
                }
                else {
                    PKTaskState::Blocked
                }
            }
            Some(PKListId::Terminated) => PKTaskState::Deleted,
            _ => PKTaskState::Ready
        }
    }

    pub(crate) fn scheduler_state(&self) -> PKSchedulerState
    {
        if !self.running {
            PKSchedulerState::NotStarted
        }
        else if self.suspended > 0 {
            PKSchedulerState::Suspended
        }
        else {
            PKSchedulerState::Running
        }
    }

    pub(crate) fn current_task(&self) -> Option<PKTaskId>
    {
        self.current.map(|idx| self.tasks.id_of(idx))
    }

    pub(crate) fn tick_count(&mut self) -> PKTick
    {
        self.enter_critical();
        let tick = self.tick;
        self.exit_critical();

        tick
    }

    pub(crate) fn tick_count_from_isr(&self) -> PKTick
    {
        let mask = self.port.raise_mask();
        let tick = self.tick;
        self.port.restore_mask(mask);

        tick
    }

    /// Tasks created and not yet reclaimed, including the idle task.
    pub(crate) fn number_of_tasks(&self) -> usize
    {
        self.num_tasks
    }

    pub(crate) fn task_name(&self, target: Option<PKTaskId>) -> &str
    {
        self.tasks.tcb(self.target_idx(target)).name()
    }

    /// Words of the stack never used so far.
    pub(crate) fn stack_unused(&self, target: Option<PKTaskId>) -> usize
    {
        self.tasks.tcb(self.target_idx(target)).stack_unused()
    }

    // ----- ----- Task and Interrupt context ----- ----- //

    pub(crate) fn enter_critical(&mut self)
    {
        self.critical.enter(&self.port);
    }

    pub(crate) fn exit_critical(&mut self)
    {
        self.critical.exit(&self.port);
    }

    pub(crate) fn mask_from_isr(&self) -> u32
    {
        self.port.raise_mask()
    }

    pub(crate) fn unmask_from_isr(&self, mask: u32)
    {
        self.port.restore_mask(mask);
    }

    /// Requests the context-switch exception once the scheduler runs.
    pub(crate) fn dispatch(&self)
    {
        if self.running {
            self.port.pend_switch();
        }
    }

    pub(crate) fn yield_within_api(&self)
    {
        self.dispatch();
    }

    // ----- ----- Helpers ----- ----- //

    /// `None` addresses the running task.
    pub(crate) fn target_idx(&self, target: Option<PKTaskId>) -> PKTaskIdx
    {
        match target {
            Some(id) => self.tasks.resolve(id),
            None => self.current.bk_unwrap()
        }
    }

    /// Same as `target_idx`, but `None` for a task waiting to be reclaimed.
    pub(crate) fn alive_idx(&self, target: Option<PKTaskId>) -> Option<PKTaskIdx>
    {
        let idx = self.target_idx(target);

        if self.tasks.tcb(idx).deleted { None } else { Some(idx) }
    }

    pub(crate) fn current_priority(&self) -> Option<PKPriority>
    {
        self.current.map(|cur| self.tasks.tcb(cur).priority)
    }

    /// Whether a task made ready should preempt the running one.
    /// `or_equal` selects `>=` over `>`, which differs between wake paths.
    pub(crate) fn outranks_current(&self, idx: PKTaskIdx, or_equal: bool) -> bool
    {
        let pri = self.tasks.tcb(idx).priority;

        match self.current_priority() {
            Some(cur) if or_equal => pri >= cur,
            Some(cur) => pri > cur,
            None => true
        }
    }

    fn reselect_before_start(&mut self)
    {
        self.current = self.qs.next_ready(&self.tasks);
    }

    #[cfg(test)]
    pub(crate) fn force_tick(&mut self, tick: PKTick)
    {
        self.tick = tick;
    }
}


#[cfg(test)]
mod tests
{
    use super::*;
    use super::testkit::*;
    use crate::notify::PKNotifyAction;

    #[test]
    fn test_highest_created_runs_first()
    {
        let mut bed = PKTestBed::new(8);
        let _a = bed.spawn("a", 1);
        let b = bed.spawn("b", 3);
        let _c = bed.spawn("c", 2);
        bed.start();

        assert_eq!(bed.running(), b);
        assert_eq!(bed.pk.task_state(b), PKTaskState::Running);
        assert_eq!(bed.pk.scheduler_state(), PKSchedulerState::Running);
        assert_eq!(bed.pk.number_of_tasks(), 4);
        assert_eq!(bed.pk.task_name(Some(bed.idle())), IDLE_TASK_NAME);
    }

    #[test]
    fn test_create_higher_preempts()
    {
        let mut bed = PKTestBed::new(8);
        let a = bed.spawn("a", 2);
        bed.start();

        let same = bed.spawn("same", 2);
        assert!(!bed.dispatch());
        assert_eq!(bed.running(), a);

        let high = bed.spawn("high", 3);
        assert!(bed.dispatch());
        assert_eq!(bed.running(), high);
        assert_eq!(bed.pk.task_state(a), PKTaskState::Ready);
        assert_eq!(bed.pk.task_state(same), PKTaskState::Ready);
    }

    #[test]
    fn test_priority_clamped()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 200);

        assert_eq!(bed.pk.priority_get(Some(a)), (MAX_PRIORITIES - 1) as PKPriority);
    }

    #[test]
    fn test_alloc_failure_is_reported()
    {
        let mut bed = PKTestBed::new(2);
        bed.spawn("a", 1);
        bed.spawn("b", 1);

        let r = bed.pk.create_task(body, "c", TEST_STACK, 0, 1);
        assert_eq!(r, Err(PKError::Alloc));

        let mut bed = PKTestBed::new(4);
        let r = bed.pk.create_task(body, "huge", 1 << 20, 0, 1);
        assert_eq!(r, Err(PKError::Alloc));
        assert_eq!(bed.pk.number_of_tasks(), 0);
    }

    #[test]
    #[should_panic]
    fn test_idle_alloc_failure_is_fatal()
    {
        let mut bed = PKTestBed::new(1);
        bed.spawn("a", 1);
        bed.pk.start(body);
    }

    #[test]
    fn test_round_robin_alternates()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        let b = bed.spawn("b", 1);
        bed.start();

        let first = bed.running();
        let mut seq = vec![first];
        for _ in 0..6 {
            bed.tick();
            seq.push(bed.running());
        }

        let other = if first == a { b } else { a };
        assert_eq!(seq, vec![first, other, first, other, first, other, first]);
    }

    #[test]
    fn test_delay_wakes_at_deadline()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();
        bed.ticks(3);

        let t0 = bed.pk.tick_count();
        bed.pk.delay(5);
        bed.dispatch();
        assert_eq!(bed.running(), lo);
        assert_eq!(bed.pk.task_state(hi), PKTaskState::Blocked);

        bed.ticks(4);
        assert_eq!(bed.running(), lo);

        bed.tick();
        assert_eq!(bed.pk.tick_count(), t0 + 5);
        assert_eq!(bed.running(), hi);
    }

    #[test]
    fn test_delay_zero_yields()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        let b = bed.spawn("b", 1);
        bed.start();

        let first = bed.running();
        bed.pk.delay(0);
        bed.dispatch();
        assert_ne!(bed.running(), first);
        assert!(bed.running() == a || bed.running() == b);
    }

    #[test]
    fn test_delay_across_wraparound()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        bed.start();

        bed.pk.force_tick(u32::MAX - 2);
        bed.pk.delay(5);
        bed.dispatch();
        assert_eq!(bed.running(), bed.idle());

        bed.ticks(4);
        assert_eq!(bed.pk.tick_count(), 1);
        assert_eq!(bed.pk.num_overflows, 1);
        assert_eq!(bed.running(), bed.idle());

        bed.tick();
        assert_eq!(bed.pk.tick_count(), 2);
        assert_eq!(bed.running(), hi);
    }

    #[test]
    fn test_delay_until_periodic()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        bed.start();

        let mut prev = bed.pk.tick_count();
        assert!(bed.pk.delay_until(&mut prev, 10));
        bed.dispatch();
        assert_eq!(prev, 10);

        bed.ticks(10);
        assert_eq!(bed.running(), hi);

        // work overran the period: no block, the period origin still advances
        bed.pk.force_tick(25);
        assert!(!bed.pk.delay_until(&mut prev, 10));
        assert_eq!(prev, 20);
        bed.dispatch();
        assert_eq!(bed.running(), hi);
    }

    #[test]
    fn test_delay_until_wake_wraps()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        bed.start();

        bed.pk.force_tick(u32::MAX - 3);
        let mut prev = u32::MAX - 5;
        assert!(bed.pk.delay_until(&mut prev, 10));
        assert_eq!(prev, 4);
        bed.dispatch();
        assert_eq!(bed.running(), bed.idle());

        bed.ticks(7);
        assert_eq!(bed.pk.tick_count(), 3);
        assert_eq!(bed.pk.num_overflows, 1);
        assert_eq!(bed.running(), bed.idle());

        bed.tick();
        assert_eq!(bed.running(), hi);
    }

    #[test]
    fn test_delay_until_after_tick_wrapped()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        bed.start();

        // the tick wrapped since prev and the wake time is still ahead
        bed.pk.force_tick(1);
        let mut prev = u32::MAX - 2;
        assert!(bed.pk.delay_until(&mut prev, 10));
        assert_eq!(prev, 7);
        bed.dispatch();
        assert_eq!(bed.running(), bed.idle());

        bed.ticks(5);
        assert_eq!(bed.running(), bed.idle());
        bed.tick();
        assert_eq!(bed.pk.tick_count(), 7);
        assert_eq!(bed.running(), hi);

        // the tick wrapped and passed the wake time too
        bed.pk.force_tick(10);
        let mut prev = u32::MAX - 2;
        assert!(!bed.pk.delay_until(&mut prev, 5));
        assert_eq!(prev, 2);
        bed.dispatch();
        assert_eq!(bed.running(), hi);
    }

    #[test]
    fn test_nested_suspend_all_defers_until_last_resume()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();

        bed.pk.delay(3);
        bed.dispatch();
        assert_eq!(bed.running(), lo);

        bed.pk.suspend_all();
        bed.pk.suspend_all();
        assert_eq!(bed.pk.scheduler_state(), PKSchedulerState::Suspended);

        bed.ticks(5);
        assert_eq!(bed.pk.tick_count(), 0);
        assert_eq!(bed.running(), lo);

        assert!(!bed.pk.resume_all());
        assert!(!bed.dispatch());
        assert_eq!(bed.pk.tick_count(), 0);

        assert!(bed.pk.resume_all());
        assert_eq!(bed.pk.tick_count(), 5);
        assert!(bed.dispatch());
        assert_eq!(bed.running(), hi);
    }

    #[test]
    #[should_panic]
    fn test_unbalanced_resume_all()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.start();

        bed.pk.suspend_all();
        bed.pk.resume_all();
        bed.pk.resume_all();
    }

    #[test]
    fn test_switch_while_suspended_is_deferred()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        bed.start();

        bed.pk.suspend_all();
        bed.pk.switch_context();
        assert!(bed.pk.yield_pending);
        assert_eq!(bed.running(), a);

        assert!(bed.pk.resume_all());
        assert!(bed.dispatch());
        assert!(!bed.pk.yield_pending);
    }

    #[test]
    fn test_suspend_and_resume()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();

        bed.pk.suspend(None);
        bed.dispatch();
        assert_eq!(bed.running(), lo);
        assert!(bed.pk.is_suspended(hi));
        assert_eq!(bed.pk.task_state(hi), PKTaskState::Suspended);

        bed.ticks(100);
        assert_eq!(bed.running(), lo);

        bed.pk.resume(hi);
        bed.dispatch();
        assert_eq!(bed.running(), hi);
        assert!(!bed.pk.is_suspended(hi));
    }

    #[test]
    fn test_resume_from_isr_during_suspend_all()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();

        bed.pk.suspend(None);
        bed.dispatch();
        assert_eq!(bed.running(), lo);

        bed.pk.suspend_all();

        bed.pk.port.set_in_isr(true);
        assert!(!bed.pk.resume_from_isr(hi));
        bed.pk.port.set_in_isr(false);

        assert_eq!(bed.pk.task_state(hi), PKTaskState::Blocked);
        assert!(!bed.dispatch());

        assert!(bed.pk.resume_all());
        bed.dispatch();
        assert_eq!(bed.running(), hi);
    }

    #[test]
    fn test_pending_ready_equal_priority_does_not_preempt()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        let b = bed.spawn("b", 1);
        bed.start();

        let first = bed.running();
        let other = if first == a { b } else { a };

        bed.pk.suspend(Some(other));
        bed.pk.suspend_all();

        bed.pk.port.set_in_isr(true);
        assert!(!bed.pk.resume_from_isr(other));
        bed.pk.port.set_in_isr(false);

        assert!(!bed.pk.resume_all());
        assert!(!bed.dispatch());
        assert_eq!(bed.running(), first);
        assert_eq!(bed.pk.task_state(other), PKTaskState::Ready);
    }

    #[test]
    fn test_resume_from_isr_equal_priority_requests_switch()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        let b = bed.spawn("b", 1);
        bed.start();

        let first = bed.running();
        let other = if first == a { b } else { a };

        bed.pk.suspend(Some(other));
        assert!(bed.pk.resume_from_isr(other));
    }

    #[test]
    fn test_delete_running_defers_reclaim()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();

        let hi_idx = hi.index();
        let free_before = bed.pk.heap.free_bytes();

        bed.pk.delete_task(None);
        assert_eq!(bed.pk.task_state(hi), PKTaskState::Deleted);
        assert!(bed.dispatch());
        assert_eq!(bed.running(), lo);

        // memory still held until housekeeping
        assert_eq!(bed.pk.heap.free_bytes(), free_before);
        assert!(bed.pk.tasks.tcb(hi_idx).stack_intact());
        assert_eq!(bed.pk.number_of_tasks(), 3);

        assert_eq!(bed.pk.housekeeping(), 1);
        assert!(bed.pk.heap.free_bytes() > free_before);
        assert_eq!(bed.pk.number_of_tasks(), 2);
        assert!(!bed.pk.tasks.is_live(hi));

        let again = bed.spawn("again", 1);
        assert_eq!(again.index(), hi_idx);
        assert_ne!(again, hi);
    }

    #[test]
    fn test_housekeeping_skips_running()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.start();

        bed.pk.delete_task(None);
        assert_eq!(bed.pk.housekeeping(), 0);

        bed.dispatch();
        assert_eq!(bed.running(), bed.idle());
        assert_eq!(bed.pk.housekeeping(), 1);
    }

    #[test]
    fn test_notify_after_delete_does_not_revive()
    {
        let mut bed = PKTestBed::new(4);
        let hi = bed.spawn("hi", 2);
        let lo = bed.spawn("lo", 1);
        bed.start();

        assert!(bed.pk.notify_wait_begin(0, 0, MAX_DELAY));
        bed.dispatch();
        assert_eq!(bed.running(), lo);

        bed.pk.delete_task(Some(hi));
        assert_eq!(bed.pk.task_state(hi), PKTaskState::Deleted);

        assert!(bed.pk.notify(hi, 0, PKNotifyAction::NoAction).is_ok());
        assert!(!bed.dispatch());
        assert_eq!(bed.running(), lo);
        assert_eq!(bed.pk.task_state(hi), PKTaskState::Deleted);

        assert_eq!(bed.pk.housekeeping(), 1);
        assert!(!bed.pk.tasks.is_live(hi));
    }

    #[test]
    fn test_deleted_task_ignores_suspend_and_resume()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        let b = bed.spawn("b", 1);
        bed.start();

        let first = bed.running();
        let other = if first == a { b } else { a };

        bed.pk.delete_task(Some(other));
        bed.pk.delete_task(Some(other));
        assert_eq!(bed.pk.deleted_waiting_cleanup, 1);

        bed.pk.suspend(Some(other));
        bed.pk.resume(other);
        bed.pk.priority_set(Some(other), 3);
        bed.pk.port.set_in_isr(true);
        assert!(!bed.pk.resume_from_isr(other));
        bed.pk.port.set_in_isr(false);

        assert_eq!(bed.pk.task_state(other), PKTaskState::Deleted);
        assert_eq!(bed.pk.priority_get(Some(other)), 1);
        assert!(!bed.dispatch());

        assert_eq!(bed.pk.housekeeping(), 1);
        assert_eq!(bed.pk.deleted_waiting_cleanup, 0);
        assert_eq!(bed.pk.number_of_tasks(), 2);
    }

    #[test]
    fn test_slot_claimed_while_scheduler_suspended()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);
        bed.start();

        bed.pk.suspend_all();

        let (first, p) = bed.pk.claim_task_slot(body, "p", TEST_STACK, 0, 1).unwrap();
        assert_ne!(bed.pk.tasks.vacant(), Some(first));
        assert!(bed.pk.tasks.is_live(p));

        let (second, _) = bed.pk.claim_task_slot(body, "q", TEST_STACK, 0, 1).unwrap();
        assert_ne!(first, second);
        assert_eq!(bed.pk.tasks.vacant(), None);

        bed.pk.resume_all();
    }

    #[test]
    #[should_panic]
    fn test_delete_idle_is_fatal()
    {
        let mut bed = PKTestBed::new(4);
        bed.start();

        let idle = bed.idle();
        bed.pk.delete_task(Some(idle));
    }

    #[test]
    fn test_idle_step_yields_to_idle_peer()
    {
        let mut bed = PKTestBed::new(4);
        bed.start();
        assert_eq!(bed.running(), bed.idle());

        bed.pk.idle_step();
        assert!(!bed.dispatch());

        let peer = bed.spawn("peer", IDLE_PRIORITY);
        bed.pk.idle_step();
        assert!(bed.dispatch());
        assert_eq!(bed.running(), peer);
    }

    #[test]
    fn test_priority_set_moves_and_yields()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 2);
        let b = bed.spawn("b", 1);
        bed.start();
        assert_eq!(bed.running(), a);

        bed.pk.priority_set(Some(b), 2);
        assert!(bed.dispatch());

        bed.pk.priority_set(Some(b), 3);
        bed.dispatch();
        assert_eq!(bed.running(), b);
        assert_eq!(bed.pk.priority_get(None), 3);

        bed.pk.priority_set(None, 1);
        bed.dispatch();
        assert_eq!(bed.running(), a);
        assert_eq!(bed.pk.qs.ready(1).len(), 1);
        assert_eq!(bed.pk.qs.top_ready_priority(), 2);
    }

    #[test]
    fn test_stack_unused_shrinks_with_frame()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);

        let unused = bed.pk.stack_unused(Some(a));
        assert!(unused <= TEST_STACK - INITIAL_FRAME_WORDS);
        assert!(unused >= TEST_STACK - INITIAL_FRAME_WORDS - 1);
    }

    #[test]
    #[should_panic]
    fn test_stack_overflow_detected()
    {
        let mut bed = PKTestBed::new(4);
        let a = bed.spawn("a", 1);
        bed.start();

        bed.pk.tasks.tcb_mut(a.index()).stack.write(0usize, 0);
        bed.pk.yield_now();
        bed.dispatch();
    }

    #[test]
    fn test_pre_start_critical_keeps_mask()
    {
        let mut bed = PKTestBed::new(4);
        bed.spawn("a", 1);

        assert_ne!(bed.pk.port.mask(), 0);
        bed.start();

        bed.pk.enter_critical();
        assert_ne!(bed.pk.port.mask(), 0);
        bed.pk.exit_critical();
        assert_eq!(bed.pk.port.mask(), 0);
    }
}
