#[doc(hidden)]
#[macro_export]
macro_rules! bk_panic {
    ($($arg:tt)*) => ({
        if cfg!(debug_assertions) {
            panic!($($arg)*);
        }
        else {
            $crate::bkptpanic::bk_halt()
        }
    });
}

#[doc(hidden)]
#[macro_export]
macro_rules! bk_assert {
    ($cond:expr) => ({
        if !$cond {
            $crate::bk_panic!("assertion failed: {}", stringify!($cond));
        }
    });
    ($cond:expr, $($arg:tt)+) => ({
        if !$cond {
            $crate::bk_panic!($($arg)+);
        }
    });
}

/// Stops on a breakpoint forever.
#[doc(hidden)]
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn bk_halt() -> !
{
    loop {
        cortex_m::asm::bkpt();
    }
}

/// Host builds have no debugger to stop at.
#[doc(hidden)]
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub fn bk_halt() -> !
{
    panic!("halted on a breakpoint");
}

pub(crate) trait BKUnwrap<T>
{
    fn bk_unwrap(self) -> T;
}

impl<T> BKUnwrap<T> for Option<T>
{
    fn bk_unwrap(self) -> T
    {
        match self {
            Some(v) => v,
            None => bk_panic!("Unwrapping on `None`")
        }
    }
}
