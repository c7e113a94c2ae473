//! Kernel heap allocator.
//!
//! A single free block chain threaded through two intrusive doubly linked
//! lists: one sorted by size (first-fit allocation), one sorted by address
//! (so freeing a block can coalesce it with physically adjacent neighbors
//! in one pass). New pages are pulled from [`super::vmm::alloc_map_k`]
//! whenever the size list runs dry.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr;

use spin::Mutex;

use super::{vmm, PAGE_SIZE};

const INITIAL_PAGES: usize = 2;
const MIN_ALLOC: usize = 16;

#[repr(C)]
struct Block {
    size: usize,
    size_prev: *mut Block,
    size_next: *mut Block,
    addr_prev: *mut Block,
    addr_next: *mut Block,
}

struct Heap {
    size_head: *mut Block,
    addr_head: *mut Block,
}

// SAFETY: all access goes through `HEAP`'s Mutex.
unsafe impl Send for Heap {}

static HEAP: Mutex<Heap> = Mutex::new(Heap {
    size_head: ptr::null_mut(),
    addr_head: ptr::null_mut(),
});

pub fn init() {
    let mut heap = HEAP.lock();
    let block = heap
        .allocate_new_pages(INITIAL_PAGES)
        .expect("no memory for initial kernel heap pages");
    heap.chain_insert(block);
    println!("[HEAP] {} initial pages mapped", INITIAL_PAGES);
}

impl Heap {
    fn allocate_new_pages(&mut self, n: usize) -> Option<*mut Block> {
        let vaddr = vmm::alloc_map_k(n)?;
        let block = vaddr as *mut Block;
        // SAFETY: `vaddr` is freshly mapped, exclusively owned memory.
        unsafe {
            (*block).size = n * PAGE_SIZE - size_of::<Block>();
        }
        Some(block)
    }

    /// Inserts `block` into both chains, defragmenting with its address
    /// neighbors first. Used both at init and by `kfree`.
    fn chain_insert(&mut self, block: *mut Block) {
        let addr_pos = self.addr_find_insert_pos(block);
        self.addr_insert_after(addr_pos, block);
        let block = self.defrag(block);
        let size_pos = self.size_find_insert_pos(block);
        self.size_insert_after(size_pos, block);
    }

    fn chain_remove(&mut self, block: *mut Block) {
        self.size_remove(block);
        self.addr_remove(block);
    }

    /// Joins `block` with physically adjacent address-list neighbors.
    /// Operates only on the address list; callers must (re)insert the
    /// result into the size list themselves.
    fn defrag(&mut self, mut block: *mut Block) -> *mut Block {
        // SAFETY: every pointer walked here is a live block in the chain,
        // guarded by `HEAP`'s lock.
        unsafe {
            let prev = (*block).addr_prev;
            if !prev.is_null() && (prev as usize + size_of::<Block>() + (*prev).size) == block as usize {
                self.addr_remove(block);
                (*prev).size += size_of::<Block>() + (*block).size;
                block = prev;
                self.size_remove(block);
            }

            let next = (*block).addr_next;
            if !next.is_null() && (block as usize + size_of::<Block>() + (*block).size) == next as usize {
                (*block).size += size_of::<Block>() + (*next).size;
                self.size_remove(next);
                self.addr_remove(next);
            }
        }
        block
    }

    fn size_find_insert_pos(&self, new: *mut Block) -> *mut Block {
        let mut cur = self.size_head;
        let mut after = ptr::null_mut();
        // SAFETY: chain invariant maintained by every insert/remove.
        unsafe {
            while !cur.is_null() && (*cur).size < (*new).size {
                after = cur;
                cur = (*cur).size_next;
            }
        }
        after
    }

    fn addr_find_insert_pos(&self, new: *mut Block) -> *mut Block {
        let mut cur = self.addr_head;
        let mut after = ptr::null_mut();
        unsafe {
            while !cur.is_null() && (cur as usize) < (new as usize) {
                after = cur;
                cur = (*cur).addr_next;
            }
        }
        after
    }

    fn size_insert_after(&mut self, after: *mut Block, new: *mut Block) {
        unsafe {
            (*new).size_prev = after;
            if after.is_null() {
                (*new).size_next = self.size_head;
                if !self.size_head.is_null() {
                    (*self.size_head).size_prev = new;
                }
                self.size_head = new;
            } else {
                (*new).size_next = (*after).size_next;
                if !(*after).size_next.is_null() {
                    (*(*after).size_next).size_prev = new;
                }
                (*after).size_next = new;
            }
        }
    }

    fn addr_insert_after(&mut self, after: *mut Block, new: *mut Block) {
        unsafe {
            (*new).addr_prev = after;
            if after.is_null() {
                (*new).addr_next = self.addr_head;
                if !self.addr_head.is_null() {
                    (*self.addr_head).addr_prev = new;
                }
                self.addr_head = new;
            } else {
                (*new).addr_next = (*after).addr_next;
                if !(*after).addr_next.is_null() {
                    (*(*after).addr_next).addr_prev = new;
                }
                (*after).addr_next = new;
            }
        }
    }

    fn size_remove(&mut self, block: *mut Block) {
        unsafe {
            if !(*block).size_prev.is_null() {
                (*(*block).size_prev).size_next = (*block).size_next;
            } else {
                self.size_head = (*block).size_next;
            }
            if !(*block).size_next.is_null() {
                (*(*block).size_next).size_prev = (*block).size_prev;
            }
        }
    }

    fn addr_remove(&mut self, block: *mut Block) {
        unsafe {
            if !(*block).addr_prev.is_null() {
                (*(*block).addr_prev).addr_next = (*block).addr_next;
            } else {
                self.addr_head = (*block).addr_next;
            }
            if !(*block).addr_next.is_null() {
                (*(*block).addr_next).addr_prev = (*block).addr_prev;
            }
        }
    }

    fn find_fit(&mut self, n: usize) -> Option<*mut Block> {
        let mut cur = self.size_head;
        unsafe {
            while !cur.is_null() {
                if (*cur).size >= n {
                    self.chain_remove(cur);
                    return Some(cur);
                }
                cur = (*cur).size_next;
            }
        }
        None
    }

    fn alloc(&mut self, size: usize) -> *mut u8 {
        let n = size.max(MIN_ALLOC);

        let mut block = match self.find_fit(n) {
            Some(b) => b,
            None => {
                let Some(mut new_block) = self.allocate_new_pages(super::pages_for(n)) else {
                    return ptr::null_mut();
                };
                let addr_pos = self.addr_find_insert_pos(new_block);
                self.addr_insert_after(addr_pos, new_block);
                new_block = self.defrag(new_block);
                self.addr_remove(new_block);
                new_block
            }
        };

        // SAFETY: `block` is an exclusively held free block of at least
        // `n` usable bytes.
        unsafe {
            if (*block).size > n + size_of::<Block>() + MIN_ALLOC {
                let remainder = (block as *mut u8).add(size_of::<Block>() + n) as *mut Block;
                (*remainder).size = (*block).size - n - size_of::<Block>();
                (*block).size = n;

                let prev = (*block).addr_prev;
                self.addr_insert_after(prev, remainder);
                let remainder = self.defrag(remainder);
                let pos = self.size_find_insert_pos(remainder);
                self.size_insert_after(pos, remainder);
            }

            (block as *mut u8).add(size_of::<Block>())
        }
    }

    /// # Safety
    /// `ptr` must have come from [`Heap::alloc`] on this heap and not
    /// already be freed.
    unsafe fn free(&mut self, ptr: *mut u8) {
        let block = unsafe { ptr.sub(size_of::<Block>()) as *mut Block };
        self.chain_insert(block);
    }
}

pub struct KernelHeap;

// SAFETY: `GlobalAlloc` methods only ever touch `HEAP` through its mutex.
unsafe impl GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP.lock().alloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // SAFETY: caller contract of `GlobalAlloc::dealloc`.
        unsafe {
            HEAP.lock().free(ptr);
        }
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::vec::Vec;

    use super::*;

    fn leaked_block(size: usize) -> *mut Block {
        Box::into_raw(Box::new(Block {
            size,
            size_prev: ptr::null_mut(),
            size_next: ptr::null_mut(),
            addr_prev: ptr::null_mut(),
            addr_next: ptr::null_mut(),
        }))
    }

    fn size_list(heap: &Heap) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = heap.size_head;
        // SAFETY: `cur` walks a chain of blocks this test owns exclusively.
        unsafe {
            while !cur.is_null() {
                out.push((*cur).size);
                cur = (*cur).size_next;
            }
        }
        out
    }

    #[test]
    fn size_list_stays_ordered_on_insert() {
        let mut heap = Heap { size_head: ptr::null_mut(), addr_head: ptr::null_mut() };
        let blocks = [leaked_block(64), leaked_block(16), leaked_block(32)];

        for &block in &blocks {
            let pos = heap.size_find_insert_pos(block);
            heap.size_insert_after(pos, block);
        }

        assert_eq!(size_list(&heap), [16, 32, 64]);

        // SAFETY: none of these blocks were ever moved into the address
        // list, so reclaiming them directly is sound.
        unsafe {
            for &block in &blocks {
                drop(Box::from_raw(block));
            }
        }
    }

    #[test]
    fn find_fit_returns_smallest_sufficient_block_and_unlinks_it() {
        let mut heap = Heap { size_head: ptr::null_mut(), addr_head: ptr::null_mut() };
        let blocks = [leaked_block(16), leaked_block(48), leaked_block(128)];
        for &block in &blocks {
            let pos = heap.size_find_insert_pos(block);
            heap.size_insert_after(pos, block);
        }

        let found = heap.find_fit(32).expect("a 48-byte block satisfies a 32-byte request");
        assert_eq!(found, blocks[1]);
        assert_eq!(size_list(&heap), [16, 128]);

        // SAFETY: `found` was just unlinked from both chains by `find_fit`;
        // the remaining two blocks are reclaimed the same way.
        unsafe {
            drop(Box::from_raw(found));
            drop(Box::from_raw(blocks[0]));
            drop(Box::from_raw(blocks[2]));
        }
    }

    #[test]
    fn chain_insert_coalesces_physically_adjacent_blocks() {
        let mut heap = Heap { size_head: ptr::null_mut(), addr_head: ptr::null_mut() };
        let payload = size_of::<Block>() + 64;
        let mut arena: Vec<u8> = alloc::vec![0u8; 2 * payload];

        // SAFETY: `arena` is exclusively owned by this test and large enough
        // to hold two back-to-back `Block` headers plus their 64-byte payloads.
        let (first, second) = unsafe {
            let first = arena.as_mut_ptr() as *mut Block;
            (*first).size = 64;
            let second = arena.as_mut_ptr().add(payload) as *mut Block;
            (*second).size = 64;
            (first, second)
        };

        heap.chain_insert(second);
        heap.chain_insert(first);

        assert_eq!(size_list(&heap), [2 * 64 + size_of::<Block>()]);
        assert_eq!(heap.size_head, first);
    }
}
