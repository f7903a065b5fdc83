/*!
This crate for Rust provides a preemptive priority scheduler `Priok` for Cortex-M microcontrollers.

# Target

**Single-core** systems of

* Cortex-M3  (`thumbv7m-none-eabi`)
* Cortex-M4 / M7  (`thumbv7em-none-eabi`)
* Cortex-M4 / M7 with FPU  (`thumbv7em-none-eabihf`)

The configuration in `config` is tuned for a Cortex-M7 at 480 MHz with 4 priority bits.
On other targets the kernel builds against a simulated port, so it can be stepped tick by tick in host tests.

# Features

* Tasks
  * Tasks are created from `extern "C"` functions with a word-sized parameter, before or after `run`.
  * A deleted task is reclaimed later by the idle task.
* Priority-based preemptive scheduling
  * The highest priority ready task always runs.
  * Round-robin on each tick among tasks of the same priority.
  * `delay` and `delay_until` for relative and periodic blocking, safe across tick wraparound.
* Synchronization
  * Direct-to-task notifications, with an array of slots per task.
  * Event lists and timeouts for building queues or semaphores on top.
* Critical sections by `BASEPRI`
  * Interrupts above the syscall ceiling are never masked by the kernel.
  * Nested critical sections and nested scheduler suspension.
* Static memory allocation
  * `Priok` doesn't require a global allocator but carves stacks from a memory block reserved in advance.

# Examples
## Usage Outline

```ignore
#![no_main]
#![no_std]

use cortex_m::Peripherals;
use cortex_m_rt::entry;
use cortex_m_rt::exception;
extern crate panic_semihosting;

use priok_cortex_m::*;

#[entry]
fn main() -> ! {
    static mut MEM: PKMemBlk<[u64; 2048]> = Priok::mem();

    let mut pk = Priok::new(MEM, 2);

    pk.create(receiver, "rx", 256, 0, 2).unwrap();
    pk.create(sender, "tx", 256, 0, 1).unwrap();

    let cmperi = Peripherals::take().unwrap();
    let mut syst = cmperi.SYST;
    syst.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
    syst.set_reload(priok_cortex_m::config::CPU_CLOCK_HZ / priok_cortex_m::config::TICK_RATE_HZ - 1);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();

    pk.run()
}

#[exception]
fn SysTick()
{
    Priok::tick();
}

extern "C" fn receiver(_: usize)
{
    loop {
        let n = Priok::notify_take(0, false, 100);

        // other codes...
    }
}

extern "C" fn sender(_: usize)
{
    // other codes...
}
```
*/

#![cfg_attr(not(test), no_std)]

pub mod config;

#[doc(hidden)]
pub mod bkptpanic;

mod memory;
mod list;
mod task;
mod critical;
mod port;
mod qset;
mod kernel;
mod notify;
mod event;
mod priok;

pub use crate::priok::{Priok, PKError, PKTaskIdx, PKPriority, PKTick};
pub use crate::memory::PKMemBlk;
pub use crate::task::PKTaskId;
pub use crate::kernel::{PKTaskFn, PKTaskState, PKSchedulerState};
pub use crate::notify::{PKNotifyAction, PKNotifyWait};
pub use crate::event::{PKEventList, PKTimeOut};
