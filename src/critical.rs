use crate::bk_assert;
use crate::port::PKPort;

//

/// Nesting count before the scheduler starts. Exiting never reaches zero from
/// here, so critical sections entered early leave interrupts masked.
const PRE_START_NESTING: usize = 0xaaaa_aaaa;

pub(crate) struct PKCritical
{
    nesting: usize
}

impl PKCritical
{
    pub(crate) const fn new() -> PKCritical
    {
        PKCritical {
            nesting: PRE_START_NESTING
        }
    }

    pub(crate) fn reset(&mut self)
    {
        self.nesting = 0;
    }

    #[cfg(test)]
    pub(crate) fn nesting(&self) -> usize
    {
        self.nesting
    }

    /// Task context only.
    pub(crate) fn enter<P: PKPort>(&mut self, port: &P)
    {
        port.raise_mask();
        self.nesting += 1;

        if self.nesting == 1 {
            bk_assert!(!port.in_isr(), "task-level critical section entered from an interrupt");
        }
    }

    pub(crate) fn exit<P: PKPort>(&mut self, port: &P)
    {
        bk_assert!(self.nesting > 0, "unbalanced critical section exit");

        self.nesting -= 1;

        if self.nesting == 0 {
            port.restore_mask(0);
        }
    }
}
