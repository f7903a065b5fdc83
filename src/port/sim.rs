use core::cell::Cell;

use crate::bk_panic;
use crate::config::MAX_SYSCALL_INTERRUPT_PRIORITY;
use crate::port::PKPort;

//

/// Port for builds without a Cortex-M core.
///
/// The mask register, the pending switch request and the interrupt context
/// are plain cells, so the kernel can be stepped tick by tick.
pub(crate) struct PKSimPort
{
    mask: Cell<u32>,
    switch_pending: Cell<bool>,
    in_isr: Cell<bool>
}

impl PKSimPort
{
    pub(crate) const fn new() -> PKSimPort
    {
        PKSimPort {
            mask: Cell::new(0),
            switch_pending: Cell::new(false),
            in_isr: Cell::new(false)
        }
    }

    pub(crate) fn mask(&self) -> u32
    {
        self.mask.get()
    }

    /// Clears and returns the pending switch request, as taking the exception would.
    pub(crate) fn take_switch_request(&self) -> bool
    {
        self.switch_pending.replace(false)
    }

    pub(crate) fn set_in_isr(&self, in_isr: bool)
    {
        self.in_isr.set(in_isr);
    }
}

impl PKPort for PKSimPort
{
    fn raise_mask(&self) -> u32
    {
        self.mask.replace(MAX_SYSCALL_INTERRUPT_PRIORITY as u32)
    }

    fn restore_mask(&self, mask: u32)
    {
        self.mask.set(mask);
    }

    fn in_isr(&self) -> bool
    {
        self.in_isr.get()
    }

    fn pend_switch(&self)
    {
        self.switch_pending.set(true);
    }

    fn start_first_task(&self) -> !
    {
        bk_panic!("no core to launch a task on")
    }

    fn wait_for_interrupt(&self)
    {
    }
}
