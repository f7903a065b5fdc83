//! Build-time configuration of the kernel.

use crate::bk_assert;

/// A task of higher priority preempts a running task of lower priority.
pub const USE_PREEMPTION: bool = true;

/// Tasks of the same priority share the CPU tick by tick.
pub const USE_TIME_SLICING: bool = true;

/// The idle task yields when another task of the idle priority is ready.
pub const IDLE_SHOULD_YIELD: bool = true;

/// Number of priority levels. `0` is the lowest and `MAX_PRIORITIES - 1` the highest.
pub const MAX_PRIORITIES: usize = 56;

pub const IDLE_PRIORITY: u8 = 0;

pub const TICK_RATE_HZ: u32 = 1000;

pub const CPU_CLOCK_HZ: u32 = 480_000_000;

/// Stack length of the idle task, in words.
pub const MINIMAL_STACK_SIZE: usize = 256;

/// Suggested size of the memory block given to `Priok::new`, in bytes.
pub const TOTAL_HEAP_SIZE: usize = 16384;

pub const MAX_TASK_NAME_LEN: usize = 16;

pub const IDLE_TASK_NAME: &str = "IDLE";

pub const NOTIFICATION_ARRAY_ENTRIES: usize = 3;

/// Number of event lists the kernel can lend out at the same time.
pub const MAX_EVENT_LISTS: usize = 4;

/// Number of released regions the heap keeps track of.
pub const HEAP_FREE_EXTENTS: usize = 16;

pub const CHECK_FOR_STACK_OVERFLOW: bool = true;

pub const INITIAL_TICK_COUNT: u32 = 0;

/// Implemented priority bits of the NVIC.
pub const PRIO_BITS: u8 = 4;

pub const LIBRARY_LOWEST_INTERRUPT_PRIORITY: u8 = 15;

/// Interrupts numerically below this level must not call the kernel.
pub const LIBRARY_MAX_SYSCALL_INTERRUPT_PRIORITY: u8 = 5;

pub const KERNEL_INTERRUPT_PRIORITY: u8 = LIBRARY_LOWEST_INTERRUPT_PRIORITY << (8 - PRIO_BITS);

pub const MAX_SYSCALL_INTERRUPT_PRIORITY: u8 = LIBRARY_MAX_SYSCALL_INTERRUPT_PRIORITY << (8 - PRIO_BITS);

/// Blocking for this many ticks means blocking without a timeout.
pub const MAX_DELAY: u32 = u32::MAX;

const _: () = assert!(MAX_PRIORITIES <= 64 && MAX_PRIORITIES > 0);
const _: () = assert!(NOTIFICATION_ARRAY_ENTRIES > 0);
const _: () = assert!(MAX_TASK_NAME_LEN > 0);

/// Converts milliseconds to ticks, truncating.
pub const fn ms_to_ticks(ms: u32) -> u32
{
    ((ms as u64 * TICK_RATE_HZ as u64) / 1000) as u32
}

/// Halts unless the syscall ceiling is usable: non-zero and not numerically
/// above the lowest interrupt priority.
pub(crate) fn validate_interrupt_priorities(lowest: u8, max_syscall: u8)
{
    bk_assert!(max_syscall != 0, "syscall interrupt ceiling must not be 0");
    bk_assert!(max_syscall <= lowest, "syscall interrupt ceiling {} above lowest level {}", max_syscall, lowest);
}
