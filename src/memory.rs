use core::mem::{MaybeUninit, size_of, align_of};

use num_integer::Integer;

use crate::PKError;
use crate::bk_assert;
use crate::config::HEAP_FREE_EXTENTS;

//

/// Every region handed out by `PKHeap` starts and ends on this boundary.
pub(crate) const HEAP_ALIGN: usize = 8;

fn align_up(x: usize, align: usize) -> usize
{
    Integer::next_multiple_of(&x, &align)
}

fn region_size<V>(len: usize) -> usize
{
    align_up(size_of::<V>() * len, HEAP_ALIGN)
}

//

/// Memory block used by `Priok`
pub struct PKMemBlk<B>(MaybeUninit<B>);

impl<B> PKMemBlk<B>
{
    pub(crate) const fn new() -> PKMemBlk<B>
    {
        PKMemBlk(MaybeUninit::<B>::uninit())
    }

    fn size(&self) -> usize
    {
        size_of::<B>()
    }

    fn head(&mut self) -> usize
    {
        self.0.as_mut_ptr() as usize
    }
}

//

pub(crate) struct PKRawArray<V>
{
    head: *mut V,
    len: usize
}

impl<V> PKRawArray<V>
{
    pub(crate) fn refer<I>(&self, i: I) -> &V
    where I: Into<usize>
    {
        let i = i.into();
        bk_assert!(i < self.len);

        unsafe { &*self.head.add(i) }
    }

    pub(crate) fn refer_mut<I>(&mut self, i: I) -> &mut V
    where I: Into<usize>
    {
        let i = i.into();
        bk_assert!(i < self.len);

        unsafe { &mut *self.head.add(i) }
    }

    pub(crate) fn read_volatile<I>(&self, i: I) -> V
    where I: Into<usize>
    {
        let i = i.into();
        bk_assert!(i < self.len);

        unsafe { self.head.add(i).read_volatile() }
    }

    /// Overwrites without dropping the previous element.
    pub(crate) fn write<I>(&mut self, i: I, v: V)
    where I: Into<usize>
    {
        let i = i.into();
        bk_assert!(i < self.len);

        unsafe { self.head.add(i).write(v); }
    }

    pub(crate) fn head(&self) -> *mut V
    {
        self.head
    }

    pub(crate) fn len(&self) -> usize
    {
        self.len
    }

    pub(crate) fn tail(&self) -> *mut V
    {
        unsafe { self.head.add(self.len) }
    }
}

//

#[derive(Clone, Copy)]
struct PKExtent
{
    start: usize,
    size: usize
}

impl PKExtent
{
    fn end(&self) -> usize
    {
        self.start + self.size
    }
}

/// Allocator over a `PKMemBlk`.
///
/// Fresh memory is carved from a bump cursor. Released regions are kept in a
/// small extent table, searched first-fit and coalesced with their neighbours.
pub(crate) struct PKHeap
{
    cur_pos: usize,
    end_cap: usize,
    extents: [PKExtent; HEAP_FREE_EXTENTS],
    num_extents: usize
}

impl PKHeap
{
    /// NOTE: the block must outlive the heap and every array carved from it.
    pub(crate) fn new<B>(mem: &mut PKMemBlk<B>) -> PKHeap
    {
        let head = mem.head();
        let end = head + mem.size();

        PKHeap {
            cur_pos: align_up(head, HEAP_ALIGN).min(end),
            end_cap: end,
            extents: [PKExtent {start: 0, size: 0}; HEAP_FREE_EXTENTS],
            num_extents: 0
        }
    }

    pub(crate) fn array<V, A>(&mut self, len: A) -> Result<PKRawArray<V>, PKError>
    where A: Into<usize>
    {
        bk_assert!(align_of::<V>() <= HEAP_ALIGN);

        let len = len.into();
        let size = size_of::<V>().checked_mul(len).ok_or(PKError::Alloc)?;
        let size = align_up(size, HEAP_ALIGN);

        let p = match self.take_extent(size) {
            Some(p) => p,
            None => {
                let p = self.cur_pos;
                let e = p.checked_add(size).ok_or(PKError::Alloc)?;

                if e > self.end_cap {
                    log::warn!("{} bytes shortage of memory block", e - self.end_cap);
                    return Err(PKError::Alloc);
                }

                self.cur_pos = e;
                p
            }
        };

        Ok(PKRawArray {
            head: p as *mut V,
            len
        })
    }

    /// Gives a region back. Elements are not dropped.
    pub(crate) fn release<V>(&mut self, arr: PKRawArray<V>)
    {
        let freed = PKExtent {
            start: arr.head as usize,
            size: region_size::<V>(arr.len)
        };

        if freed.size == 0 {
            return;
        }

        if freed.end() == self.cur_pos {
            self.cur_pos = freed.start;
            self.roll_back();
            return;
        }

        let mut merged = None;

        for i in 0..self.num_extents {
            let ext = &mut self.extents[i];

            if ext.end() == freed.start {
                ext.size += freed.size;
                merged = Some(i);
                break;
            }
            else if freed.end() == ext.start {
                ext.start = freed.start;
                ext.size += freed.size;
                merged = Some(i);
                break;
            }
        }

        match merged {
            Some(i) => {
                // the grown extent may now touch another one
                let grown = self.extents[i];

                for j in 0..self.num_extents {
                    if j == i {
                        continue;
                    }

                    let other = self.extents[j];

                    if other.start == grown.end() || other.end() == grown.start {
                        self.extents[i] = PKExtent {
                            start: grown.start.min(other.start),
                            size: grown.size + other.size
                        };
                        self.remove_extent(j);
                        break;
                    }
                }
            }
            None => {
                if self.num_extents < HEAP_FREE_EXTENTS {
                    self.extents[self.num_extents] = freed;
                    self.num_extents += 1;
                }
                else {
                    log::warn!("extent table full, {} bytes leaked", freed.size);
                }
            }
        }
    }

    /// Bytes still available for allocation.
    pub(crate) fn free_bytes(&self) -> usize
    {
        let in_extents: usize = self.extents[..self.num_extents].iter().map(|e| e.size).sum();

        self.end_cap - self.cur_pos + in_extents
    }

    fn take_extent(&mut self, size: usize) -> Option<usize>
    {
        if size == 0 {
            return None;
        }

        let i = (0..self.num_extents).find(|&i| self.extents[i].size >= size)?;
        let ext = &mut self.extents[i];
        let p = ext.start;

        ext.start += size;
        ext.size -= size;

        if ext.size == 0 {
            self.remove_extent(i);
        }

        Some(p)
    }

    fn remove_extent(&mut self, i: usize)
    {
        self.num_extents -= 1;
        self.extents[i] = self.extents[self.num_extents];
    }

    fn roll_back(&mut self)
    {
        while let Some(i) = (0..self.num_extents).find(|&i| self.extents[i].end() == self.cur_pos) {
            self.cur_pos = self.extents[i].start;
            self.remove_extent(i);
        }
    }
}
