use core::arch::global_asm;

use cortex_m::peripheral::SCB;
use cortex_m::peripheral::scb::VectActive;
use cortex_m::register::{basepri, control};

use crate::bk_assert;
use crate::config::{KERNEL_INTERRUPT_PRIORITY, MAX_SYSCALL_INTERRUPT_PRIORITY};
use crate::port::PKPort;
use crate::priok::pkkernel_get_mut;

//

/// Floating-point context control register
#[cfg(target_abi = "eabihf")]
const FPCCR: *mut u32 = 0xe000_ef34 as *mut u32;

/// ASPEN | LSPEN: lazy stacking of the FPU context on exception entry
#[cfg(target_abi = "eabihf")]
const FPCCR_LAZY_STACKING: u32 = (1 << 31) | (1 << 30);

extern "C" {
    fn priok_start_first_task() -> !;
}

/// Port for Cortex-M3/M4/M7 cores.
///
/// * PendSV switches contexts and SVCall launches the first task.
///   Both are defined here, so the application must not define them.
/// * SysTick is not taken. The application calls `Priok::tick` from its own handler.
pub(crate) struct PKCortexM;

impl PKCortexM
{
    pub(crate) const fn new() -> PKCortexM
    {
        PKCortexM
    }
}

impl PKPort for PKCortexM
{
    fn raise_mask(&self) -> u32
    {
        let prev = basepri::read();

        // Cortex-M7 r0p1 erratum 837070: BASEPRI writes need interrupts disabled
        cortex_m::interrupt::disable();
        unsafe {
            basepri::write(MAX_SYSCALL_INTERRUPT_PRIORITY);
        }
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
        unsafe {
            cortex_m::interrupt::enable();
        }

        prev as u32
    }

    fn restore_mask(&self, mask: u32)
    {
        unsafe {
            basepri::write(mask as u8);
        }
    }

    fn in_isr(&self) -> bool
    {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn pend_switch(&self)
    {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn start_first_task(&self) -> !
    {
        bk_assert!(control::read().spsel().is_msp(), "CONTROL.SPSEL: must be SP_main");

        unsafe {
            let scb = &*SCB::PTR;
            scb.shpr[10].write(KERNEL_INTERRUPT_PRIORITY); // PendSV
            scb.shpr[11].write(KERNEL_INTERRUPT_PRIORITY); // SysTick

            #[cfg(target_abi = "eabihf")]
            FPCCR.write_volatile(FPCCR.read_volatile() | FPCCR_LAZY_STACKING);

            priok_start_first_task()
        }
    }

    fn wait_for_interrupt(&self)
    {
        cortex_m::asm::wfi();
    }
}

//

#[no_mangle]
extern "C" fn priok_switch_context(sp: *mut usize) -> *mut usize
{
    match pkkernel_get_mut() {
        Some(pk) => pk.save_and_switch(sp),
        None => sp
    }
}

#[no_mangle]
extern "C" fn priok_launch_context() -> *mut usize
{
    match pkkernel_get_mut() {
        Some(pk) => pk.launch_context(),
        None => crate::bk_panic!("no kernel to launch")
    }
}

//

global_asm!(
    ".section .text.priok_start_first_task, \"ax\"",
    ".global priok_start_first_task",
    ".type priok_start_first_task, %function",
    ".thumb_func",
    "priok_start_first_task:",
    // rewind MSP to its reset value found through VTOR
    "    ldr r0, =0xe000ed08",
    "    ldr r0, [r0]",
    "    ldr r0, [r0]",
    "    msr msp, r0",
    "    mov r0, #0",
    "    msr control, r0",
    "    cpsie i",
    "    cpsie f",
    "    dsb",
    "    isb",
    "    svc 0",
    "    nop",
    "    .ltorg",
    "",
    ".section .text.SVCall, \"ax\"",
    ".global SVCall",
    ".type SVCall, %function",
    ".thumb_func",
    "SVCall:",
    "    bl priok_launch_context",
    "    ldmia r0!, {{r4-r12, lr}}",
    "    msr psp, r0",
    "    isb",
    "    bx lr",
);

#[cfg(not(target_abi = "eabihf"))]
global_asm!(
    ".section .text.PendSV, \"ax\"",
    ".global PendSV",
    ".type PendSV, %function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    isb",
    "    stmdb r0!, {{r4-r12, lr}}",
    "    bl priok_switch_context",
    "    ldmia r0!, {{r4-r12, lr}}",
    "    msr psp, r0",
    "    isb",
    "    bx lr",
);

#[cfg(target_abi = "eabihf")]
global_asm!(
    ".section .text.PendSV, \"ax\"",
    ".global PendSV",
    ".type PendSV, %function",
    ".thumb_func",
    "PendSV:",
    "    mrs r0, psp",
    "    isb",
    // EXC_RETURN bit 4 clear: the task used the FPU
    "    tst lr, #0x10",
    "    it eq",
    "    vstmdbeq r0!, {{s16-s31}}",
    "    stmdb r0!, {{r4-r12, lr}}",
    "    bl priok_switch_context",
    "    ldmia r0!, {{r4-r12, lr}}",
    "    tst lr, #0x10",
    "    it eq",
    "    vldmiaeq r0!, {{s16-s31}}",
    "    msr psp, r0",
    "    isb",
    "    bx lr",
);
