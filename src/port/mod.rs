use core::mem::align_of;

use num_integer::Integer;

//

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) mod cortex_m;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) mod sim;

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub(crate) type PKDefaultPort = cortex_m::PKCortexM;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub(crate) type PKDefaultPort = sim::PKSimPort;

//

/// What the kernel needs from the CPU it runs on.
pub(crate) trait PKPort
{
    /// Raises the interrupt mask to the syscall ceiling and returns the previous mask.
    fn raise_mask(&self) -> u32;

    fn restore_mask(&self, mask: u32);

    fn in_isr(&self) -> bool;

    /// Requests the context-switch exception.
    fn pend_switch(&self);

    /// Launches the task the kernel selects first.
    fn start_first_task(&self) -> !;

    fn wait_for_interrupt(&self);

    /// Builds the context restored on the first switch to a task.
    /// * `top` - one past the highest word of the stack.
    /// * Returns the saved stack pointer.
    fn init_stack(&self, top: *mut usize, entry: usize, param: usize, exit: usize) -> *mut usize
    {
        setup_stack(top, entry, param, exit)
    }
}

//

/*
Refer exception entry behavior of ARM v7-M Architecture Reference Manual

sp+
0-9: [context preservation by SW at PendSV]
    R4      R5      R6      R7      R8      R9      R10     R11
    (R12)   LR(exc)
10-17: [Basic frame saved by HW at exception entry]
    R0      R1      R2      R3      R12     LR(R14) RetAddr xPSR
*/

/// Words of the initial context image.
pub(crate) const INITIAL_FRAME_WORDS: usize = 18;

pub(crate) const FRAME_EXC_RETURN: usize = 9;
pub(crate) const FRAME_R0: usize = 10;
pub(crate) const FRAME_LR: usize = 10 + 5;
pub(crate) const FRAME_PC: usize = 10 + 6;
pub(crate) const FRAME_XPSR: usize = 10 + 7;

/// Return to Thread mode, Process stack, Basic frame
pub(crate) const EXC_RETURN_THREAD_PSP: usize = 0xffff_fffd;

/// T-bit, since Cortex-M has only Thumb instructions
pub(crate) const INITIAL_XPSR: usize = 0x0100_0000;

fn setup_stack(top: *mut usize, entry: usize, param: usize, exit: usize) -> *mut usize
{
    let top = top as usize;
    let top = Integer::prev_multiple_of(&top, &align_of::<u64>()); // 8-byte align
    let top = top as *mut usize;

    unsafe {
        let sp = top.sub(INITIAL_FRAME_WORDS);

        for i in 0..FRAME_EXC_RETURN {
            sp.add(i).write_volatile(0);
        }

        sp.add(FRAME_EXC_RETURN).write_volatile(EXC_RETURN_THREAD_PSP);

        // R0 carries the task parameter
        sp.add(FRAME_R0).write_volatile(param);
        for i in FRAME_R0 + 1..FRAME_LR {
            sp.add(i).write_volatile(0);
        }

        sp.add(FRAME_LR).write_volatile(exit);
        sp.add(FRAME_PC).write_volatile(entry & !1);
        sp.add(FRAME_XPSR).write_volatile(INITIAL_XPSR);

        sp
    }
}
