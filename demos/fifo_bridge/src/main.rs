// Runnable on QEMU ARM

#![no_main]
#![no_std]

use core::cell::Cell;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use cortex_m::Peripherals;
use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use cortex_m_rt::exception;
use cortex_m_semihosting::debug;
use cortex_m_semihosting::hprintln;
use panic_semihosting as _;

use priok_cortex_m::*;
use priok_cortex_m::config::{TICK_RATE_HZ, MAX_DELAY};

//

const CLOCK: u32 = 12_000_000; // lm3s6965evb

const RING_LEN: usize = 16;
const CHUNK: usize = 64;
const CHUNKS: u32 = 8;

// single producer, single consumer
struct Ring
{
    buf: [AtomicU8; RING_LEN],
    head: AtomicUsize,
    tail: AtomicUsize
}

impl Ring
{
    const fn new() -> Ring
    {
        const ZERO: AtomicU8 = AtomicU8::new(0);

        Ring {
            buf: [ZERO; RING_LEN],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0)
        }
    }

    fn push(&self, v: u8) -> bool
    {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) == RING_LEN {
            return false;
        }

        self.buf[head % RING_LEN].store(v, Ordering::Relaxed);
        self.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    fn pop(&self) -> Option<u8>
    {
        let tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let v = self.buf[tail % RING_LEN].load(Ordering::Relaxed);
        self.tail.store(tail.wrapping_add(1), Ordering::Release);
        Some(v)
    }
}

static RING: Ring = Ring::new();

static REPORTER: Mutex<Cell<Option<PKTaskId>>> = Mutex::new(Cell::new(None));

//

#[entry]
fn main() -> !
{
    // the main stack is reclaimed for interrupts once the scheduler runs
    static mut MEM: PKMemBlk<[u64; 2048]> = Priok::mem();

    let mut pk = Priok::new(MEM, 3);

    let rep = pk.create(reporter, "report", 256, 0, 2).unwrap();
    cortex_m::interrupt::free(|cs| REPORTER.borrow(cs).set(Some(rep)));

    pk.create(producer, "tx", 256, 0, 1).unwrap();
    pk.create(consumer, "rx", 256, 0, 1).unwrap();

    // SysTick settings
    let cmperi = Peripherals::take().unwrap();
    let mut syst = cmperi.SYST;
    syst.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
    syst.set_reload(CLOCK / TICK_RATE_HZ - 1);
    syst.clear_current();
    syst.enable_counter();
    syst.enable_interrupt();

    hprintln!("Priok run");
    pk.run()
}

#[exception]
fn SysTick()
{
    Priok::tick();
}

// ----- ----- ----- ----- -----

extern "C" fn producer(_: usize)
{
    let mut v: u8 = 0;

    loop {
        while !RING.push(v) {
            Priok::yield_now();
        }

        v = v.wrapping_add(1);
    }
}

extern "C" fn consumer(_: usize)
{
    let reporter = cortex_m::interrupt::free(|cs| REPORTER.borrow(cs).get()).unwrap();
    let mut expect: u8 = 0;
    let mut n = 0;

    loop {
        match RING.pop() {
            Some(v) => {
                assert_eq!(v, expect);
                expect = expect.wrapping_add(1);

                n += 1;
                if n % CHUNK == 0 {
                    Priok::notify_give(reporter);
                }
            }
            None => Priok::yield_now()
        }
    }
}

extern "C" fn reporter(_: usize)
{
    let mut chunks = 0;

    while chunks < CHUNKS {
        chunks += Priok::notify_take(0, true, MAX_DELAY);

        hprintln!("{} chunks at tick {}, {} words of stack left",
            chunks, Priok::tick_count(), Priok::stack_unused(None));
    }

    hprintln!("reporter exit");
    debug::exit(debug::EXIT_SUCCESS);

    loop {
        Priok::suspend(None);
    }
}
