use core::fmt;
use core::marker::PhantomData;
use core::ptr::{addr_of, addr_of_mut};

use crate::{bk_panic, PKTaskId};
use crate::bkptpanic::BKUnwrap;
use crate::event::{PKEventList, PKTimeOut};
use crate::kernel::{PKKernel, PKTaskFn, PKTaskState, PKSchedulerState};
use crate::memory::{PKMemBlk, PKHeap};
use crate::notify::{PKNotifyAction, PKNotifyWait};
use crate::port::{PKPort, PKDefaultPort};

//

/// Task slot index.
pub type PKTaskIdx = u16;

/// Task priority. The higher value is the higher priority, and `0` is the idle priority.
pub type PKPriority = u8;

/// Tick count.
pub type PKTick = u32;

/// Recoverable failures.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PKError
{
    /// The memory block or the task table is exhausted.
    Alloc,
    /// Every event list is in use.
    NoEventList,
    /// A value was refused because a previous notification is still pending.
    AlreadyNotified
}

impl fmt::Display for PKError
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            PKError::Alloc => write!(f, "memory shortage"),
            PKError::NoEventList => write!(f, "no free event list"),
            PKError::AlreadyNotified => write!(f, "already notified")
        }
    }
}

//

static mut O_PKKERNEL: Option<PKKernel<PKDefaultPort>> = None;

fn pkkernel_create(pk: PKKernel<PKDefaultPort>)
{
    unsafe {
        *addr_of_mut!(O_PKKERNEL) = Some(pk);
    }
}

pub(crate) fn pkkernel_get_ref() -> Option<&'static PKKernel<PKDefaultPort>>
{
    unsafe {
        (*addr_of!(O_PKKERNEL)).as_ref()
    }
}

pub(crate) fn pkkernel_get_mut() -> Option<&'static mut PKKernel<PKDefaultPort>>
{
    unsafe {
        (*addr_of_mut!(O_PKKERNEL)).as_mut()
    }
}

fn kernel() -> &'static mut PKKernel<PKDefaultPort>
{
    pkkernel_get_mut().bk_unwrap()
}

extern "C" fn idle_task(_: usize)
{
    loop {
        if let Some(pk) = pkkernel_get_mut() {
            pk.idle_step();
        }
    }
}

//

/// Scheduler API
pub struct Priok<'a>
{
    phantom: PhantomData<&'a mut ()>
}

impl<'a> Priok<'a>
{
    // ----- ----- Main context ----- ----- //

    /// Reserves a memory block to be used by `Priok` instance.
    /// * Any type `B` specifies a size of the memory block. Typically use `[u64; N]` for `8 * N` bytes.
    /// * Returns the reserved memory block.
    pub const fn mem<B>() -> PKMemBlk<B>
    {
        PKMemBlk::new()
    }

    /// Creates `Priok` instance.
    /// * `mem` - reserved memory block. Task control blocks and stacks are carved from it.
    ///   It must not live on the main stack, which `run` hands over to interrupt handlers.
    /// * `num_tasks` - number of application tasks alive at the same time. A slot for the idle task is added.
    /// * Returns the created instance.
    pub fn new<B>(mem: &'a mut PKMemBlk<B>, num_tasks: usize) -> Priok<'a>
    {
        let heap = PKHeap::new(mem);

        match PKKernel::new(PKDefaultPort::new(), heap, num_tasks + 1) {
            Ok(pk) => pkkernel_create(pk),
            Err(e) => bk_panic!("task table: {}", e)
        }

        Priok {
            phantom: PhantomData
        }
    }

    /// Creates a task before the scheduler starts.
    /// * `entry` - task function. It must never return.
    /// * `name` - truncated to fit the name buffer.
    /// * `stack_len` - length of a stack in words.
    /// * `param` - passed to `entry`.
    /// * `pri` - task priority. Clamped to the highest one.
    /// * Returns the task handle, or `PKError::Alloc` on memory shortage.
    pub fn create(&mut self, entry: PKTaskFn, name: &str, stack_len: usize, param: usize, pri: PKPriority) -> Result<PKTaskId, PKError>
    {
        kernel().create_task(entry, name, stack_len, param, pri)
    }

    /// Starts the scheduler with the highest priority task.
    /// * Never returns.
    pub fn run(self) -> !
    {
        let pk = kernel();

        pk.start(idle_task);

        core::mem::forget(self);

        pk.port.start_first_task()
    }

    // ----- ----- Task context ----- ----- //

    /// Creates a task while the scheduler runs. It preempts the caller if it has a higher priority.
    pub fn spawn(entry: PKTaskFn, name: &str, stack_len: usize, param: usize, pri: PKPriority) -> Result<PKTaskId, PKError>
    {
        kernel().create_task(entry, name, stack_len, param, pri)
    }

    /// Deletes a task. `None` deletes the caller.
    /// * Its stack is reclaimed later by the idle task.
    pub fn delete(target: Option<PKTaskId>)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.delete_task(target);
        }
    }

    /// Blocks the caller for `ticks`. `0` just yields.
    pub fn delay(ticks: PKTick)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.delay(ticks);
        }
    }

    /// Blocks the caller until `*prev + inc`, then advances `*prev` by `inc`.
    /// * Returns `false` if the time had already passed.
    pub fn delay_until(prev: &mut PKTick, inc: PKTick) -> bool
    {
        kernel().delay_until(prev, inc)
    }

    /// Hands the CPU to another ready task of the same priority, if any.
    pub fn yield_now()
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.yield_now();
        }
    }

    /// Suspends a task until `resume`. `None` suspends the caller.
    pub fn suspend(target: Option<PKTaskId>)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.suspend(target);
        }
    }

    pub fn resume(target: PKTaskId)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.resume(target);
        }
    }

    /// Stops switching without masking interrupts. Calls nest.
    pub fn suspend_all()
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.suspend_all();
        }
    }

    /// Undoes one `suspend_all`. The last one replays the ticks missed meanwhile.
    /// * Returns `true` if a switch was already requested.
    pub fn resume_all() -> bool
    {
        kernel().resume_all()
    }

    pub fn priority(target: Option<PKTaskId>) -> PKPriority
    {
        kernel().priority_get(target)
    }

    pub fn set_priority(target: Option<PKTaskId>, pri: PKPriority)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.priority_set(target, pri);
        }
    }

    pub fn state(id: PKTaskId) -> PKTaskState
    {
        match pkkernel_get_ref() {
            Some(pk) => pk.task_state(id),
            None => PKTaskState::Deleted
        }
    }

    pub fn scheduler_state() -> PKSchedulerState
    {
        match pkkernel_get_ref() {
            Some(pk) => pk.scheduler_state(),
            None => PKSchedulerState::NotStarted
        }
    }

    /// Gets the handle of a current running task if any.
    pub fn current() -> Option<PKTaskId>
    {
        pkkernel_get_ref().and_then(|pk| pk.current_task())
    }

    pub fn tick_count() -> PKTick
    {
        kernel().tick_count()
    }

    pub fn number_of_tasks() -> usize
    {
        pkkernel_get_ref().map_or(0, |pk| pk.number_of_tasks())
    }

    /// Words of the stack never touched so far. `None` addresses the caller.
    pub fn stack_unused(target: Option<PKTaskId>) -> usize
    {
        kernel().stack_unused(target)
    }

    /// Lends the name of a task to `f`. `None` addresses the caller.
    pub fn task_name<R, F>(target: Option<PKTaskId>, f: F) -> R
    where F: FnOnce(&str) -> R
    {
        let pk = kernel();

        pk.enter_critical();
        let r = f(pk.task_name(target));
        pk.exit_critical();

        r
    }

    // ----- ----- Notification ----- ----- //

    /// Sends a notification to slot `index` of a task.
    /// * Returns the value before the action, or `PKError::AlreadyNotified` if the value was refused.
    /// * A deleted task not yet reclaimed is never woken.
    pub fn notify(target: PKTaskId, index: usize, action: PKNotifyAction) -> Result<u32, PKError>
    {
        kernel().notify(target, index, action)
    }

    /// Increments slot 0 of a task, like giving a counting semaphore.
    pub fn notify_give(target: PKTaskId)
    {
        if let Some(pk) = pkkernel_get_mut() {
            // an increment is never refused
            let _ = pk.notify(target, 0, PKNotifyAction::Increment);
        }
    }

    /// Waits on slot `index` for at most `ticks`.
    /// * `clear_on_entry` - bits cleared before waiting, unless a notification is already pending.
    /// * `clear_on_exit` - bits cleared after a notification was received.
    pub fn notify_wait(index: usize, clear_on_entry: u32, clear_on_exit: u32, ticks: PKTick) -> PKNotifyWait
    {
        let pk = kernel();

        pk.notify_wait_begin(index, clear_on_entry, ticks);
        pk.notify_wait_end(index, clear_on_exit)
    }

    /// Waits for slot `index` to become non-zero for at most `ticks`.
    /// * `clear_on_exit` - `true` zeroes the count, `false` decrements it.
    /// * Returns the count before it was consumed. `0` means a timeout.
    pub fn notify_take(index: usize, clear_on_exit: bool, ticks: PKTick) -> u32
    {
        let pk = kernel();

        pk.notify_take_begin(index, ticks);
        pk.notify_take_end(index, clear_on_exit)
    }

    /// Drops a pending notification of slot `index`.
    /// * Returns `true` if one was pending.
    pub fn notify_state_clear(target: Option<PKTaskId>, index: usize) -> bool
    {
        kernel().notify_state_clear(target, index)
    }

    /// Clears `bits` of slot `index`.
    /// * Returns the value before clearing.
    pub fn notify_value_clear(target: Option<PKTaskId>, index: usize, bits: u32) -> u32
    {
        kernel().notify_value_clear(target, index, bits)
    }

    // ----- ----- Event lists ----- ----- //

    /// Takes an event list from the pool, to build blocking primitives on.
    pub fn event_create() -> Result<PKEventList, PKError>
    {
        kernel().create_event_list()
    }

    /// Returns an event list with no waiter to the pool.
    pub fn event_delete(ev: PKEventList)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.delete_event_list(ev);
        }
    }

    /// Blocks the caller on `ev` for at most `ticks`.
    pub fn event_wait(ev: PKEventList, ticks: PKTick)
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.wait_event(ev, ticks);
        }
    }

    /// Readies the highest priority waiter of `ev`.
    /// * Returns `true` if it outranks the caller, in which case the caller was already preempted.
    pub fn event_signal(ev: PKEventList) -> bool
    {
        kernel().signal_event(ev)
    }

    pub fn event_waiters(ev: PKEventList) -> usize
    {
        kernel().event_waiters(ev)
    }

    /// Records the tick to measure a bounded wait from.
    pub fn timeout_start() -> PKTimeOut
    {
        kernel().set_timeout_state()
    }

    /// Charges the ticks elapsed since `to` against `ticks_to_wait`, and restarts `to`.
    /// * Returns `true` once the wait has timed out.
    pub fn timeout_check(to: &mut PKTimeOut, ticks_to_wait: &mut PKTick) -> bool
    {
        kernel().check_for_timeout(to, ticks_to_wait)
    }

    /// Makes the next tick switch tasks.
    pub fn missed_yield()
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.missed_yield();
        }
    }

    // ----- ----- Interrupt context ----- ----- //

    /// Advances the tick. Call from the periodic timer handler.
    /// * Returns `true` if a context switch was requested.
    pub fn tick() -> bool
    {
        match pkkernel_get_mut() {
            Some(pk) if pk.running => pk.tick_interrupt(),
            _ => false
        }
    }

    pub fn tick_count_from_isr() -> PKTick
    {
        kernel().tick_count_from_isr()
    }

    /// * Returns `true` if the resumed task should run before the interrupted one.
    pub fn resume_from_isr(target: PKTaskId) -> bool
    {
        kernel().resume_from_isr(target)
    }

    /// * Returns the value before the action, and `true` if the notified task
    ///   should run before the interrupted one.
    pub fn notify_from_isr(target: PKTaskId, index: usize, action: PKNotifyAction) -> (Result<u32, PKError>, bool)
    {
        kernel().notify_from_isr(target, index, action)
    }

    /// * Returns `true` if the notified task should run before the interrupted one.
    pub fn notify_give_from_isr(target: PKTaskId) -> bool
    {
        let (_, woken) = kernel().notify_from_isr(target, 0, PKNotifyAction::Increment);

        woken
    }

    /// * Returns `true` if the readied waiter should run before the interrupted one.
    pub fn event_signal_from_isr(ev: PKEventList) -> bool
    {
        kernel().signal_event_from_isr(ev)
    }

    /// Requests a context switch on the way out of the handler if `switch` is `true`.
    pub fn yield_from_isr(switch: bool)
    {
        if switch {
            if let Some(pk) = pkkernel_get_ref() {
                pk.dispatch();
            }
        }
    }

    /// Masks the interrupts that may call the API.
    /// * Returns the mask to give back to `unmask_from_isr`.
    pub fn mask_from_isr() -> u32
    {
        match pkkernel_get_ref() {
            Some(pk) => pk.mask_from_isr(),
            None => 0
        }
    }

    pub fn unmask_from_isr(mask: u32)
    {
        if let Some(pk) = pkkernel_get_ref() {
            pk.unmask_from_isr(mask);
        }
    }

    // ----- ----- Task and Interrupt context ----- ----- //

    /// Enters a critical section. Calls nest. Task context only.
    pub fn enter_critical()
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.enter_critical();
        }
    }

    pub fn exit_critical()
    {
        if let Some(pk) = pkkernel_get_mut() {
            pk.exit_critical();
        }
    }

    /// Runs `f` inside a critical section.
    pub fn critical<R, F>(f: F) -> R
    where F: FnOnce() -> R
    {
        Priok::enter_critical();
        let r = f();
        Priok::exit_critical();

        r
    }
}

impl Drop for Priok<'_>
{
    fn drop(&mut self)
    {
        panic!("Priok dropped without a run");
    }
}
