//! Replays a few allocation scenarios on heaps backed by the kernel and
//! prints the chain after every step.
//!
//! Run it with `RUST_LOG=debug` to also see mappings and growth.

use std::io::{self, Write};

use chainheap::{BLOCK_HEADER_SIZE, Heap, HeapConfig, Kernel, Placement, PlatformMemory};

fn heap_at(base_address: usize) -> Heap {
    let config = HeapConfig::new().with_base_address(base_address);
    Heap::with_config(config, Kernel::new(), 15000).expect("could not map the heap")
}

fn dump(out: &mut impl Write, title: &str, heap: &Heap) -> io::Result<()> {
    writeln!(out, "\n{title}")?;
    heap.debug_dump(out)
}

fn usual_malloc(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nTEST 1: usual malloc")?;

    let mut heap = heap_at(0x0404_0000);
    dump(out, "Heap before allocating:", &heap)?;

    heap.allocate(200);
    dump(out, "Heap after allocating 200 bytes:", &heap)
}

fn free_one_block(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nTEST 2: free one block")?;

    let mut heap = heap_at(0x0804_0000);
    let block1 = heap.allocate(200);
    heap.allocate(400);
    dump(out, "Heap before releasing:", &heap)?;

    unsafe { heap.release(block1) };
    dump(out, "Heap after releasing the first block:", &heap)
}

fn free_several_blocks(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nTEST 3: free several blocks")?;

    let mut heap = heap_at(0x0c04_0000);
    let block1 = heap.allocate(200);
    let block2 = heap.allocate(400);
    dump(out, "Heap before releasing:", &heap)?;

    unsafe { heap.release(block2) };
    dump(out, "Heap after releasing the second block:", &heap)?;

    unsafe { heap.release(block1) };
    dump(out, "Heap after releasing the first block:", &heap)
}

fn memory_ended(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nTEST 4: memory ended")?;

    let mut heap = heap_at(0x1004_0000);
    heap.allocate(500);
    dump(out, "Heap before the big allocation:", &heap)?;

    heap.allocate(20000);
    dump(out, "Heap after allocating 20000 bytes:", &heap)
}

fn memory_ended_and_shifted(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nTEST 5: memory ended and shifted")?;

    let mut heap = heap_at(0x1404_0000);
    dump(out, "Initial heap:", &heap)?;

    let first = heap.blocks().next().expect("heaps have at least one block");
    let end = first.address + BLOCK_HEADER_SIZE + first.capacity;

    let mut kernel = Kernel::new();
    if kernel.map_pages(end, 50 * kernel.page_size(), Placement::Exact).is_none() {
        writeln!(out, "(could not occupy {end:#x}, growth may still be contiguous)")?;
    }

    heap.allocate(50000);
    dump(out, "Heap after allocating 50000 bytes:", &heap)
}

fn main() -> io::Result<()> {
    env_logger::init();

    let stdout = io::stdout();
    let mut out = stdout.lock();

    usual_malloc(&mut out)?;
    free_one_block(&mut out)?;
    free_several_blocks(&mut out)?;
    memory_ended(&mut out)?;
    memory_ended_and_shifted(&mut out)?;

    writeln!(out, "\n----------------------------------------------------------------")
}
