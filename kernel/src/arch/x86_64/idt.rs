// Interrupt Descriptor Table

use lazy_static::lazy_static;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::PrivilegeLevel;

use super::trap::{syscall_entry, timer_entry};

lazy_static! {
    static ref IDT: InterruptDescriptorTable = {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        idt.page_fault.set_handler_fn(page_fault_handler);
        idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
        idt.general_protection_fault
            .set_handler_fn(general_protection_fault_handler);
        // SAFETY: both stacks are reserved, 16-byte-aligned, and large
        // enough (see `gdt::TSS`); `double_fault_handler` never returns,
        // and the naked trap stubs restore every register they push before
        // their own `iretq`.
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(crate::arch::x86_64::gdt::DOUBLE_FAULT_IST_INDEX);

            // `timer_entry`/`syscall_entry` are naked `extern "C"` functions,
            // not the compiler-generated `extern "x86-interrupt"` ABI, so
            // they're installed by raw address rather than `set_handler_fn`.
            idt[crate::irq::PIC_OFFSET + crate::irq::TIMER_IRQ]
                .set_handler_addr(x86_64::VirtAddr::new(timer_entry as u64))
                .set_stack_index(crate::arch::x86_64::gdt::TRAP_IST_INDEX);

            idt[crate::arch::x86_64::syscall::SYSCALL_VECTOR]
                .set_handler_addr(x86_64::VirtAddr::new(syscall_entry as u64))
                .set_stack_index(crate::arch::x86_64::gdt::TRAP_IST_INDEX)
                .set_privilege_level(PrivilegeLevel::Ring3);

            idt[crate::irq::PIC_OFFSET + crate::irq::KEYBOARD_IRQ]
                .set_handler_fn(keyboard_interrupt_handler);
        }
        idt
    };
}

#[allow(dead_code)]
pub fn init() {
    IDT.load();
    crate::irq::unmask(crate::irq::TIMER_IRQ);
    crate::irq::unmask(crate::irq::KEYBOARD_IRQ);
}

fn is_user_frame(stack_frame: &InterruptStackFrame) -> bool {
    stack_frame.code_segment.rpl() == PrivilegeLevel::Ring3
}

/// A live process hit an exception the kernel can't recover from on its
/// behalf: zombify it and hand control back to the scheduler. Never called
/// for a kernel-mode fault, which is always a bug worth panicking over.
fn kill_current_and_dispatch(reason: &str) -> ! {
    if let Some(pid) = crate::process::current_pid() {
        log::warn!("killing pid {:?}: {reason}", pid);
        let _ = crate::process::exit::zombify(pid);
    }
    crate::sched::dispatch();
}

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use crate::mm::page_fault::{self, FaultOutcome};
    use crate::mm::page_table::PageMapper;
    use x86_64::registers::control::Cr2;

    let fault_addr = Cr2::read_raw();
    let from_user = is_user_frame(&stack_frame);
    let mapper = PageMapper::current();

    match page_fault::handle(&mapper, fault_addr, from_user) {
        FaultOutcome::Resolved => {}
        FaultOutcome::KillProcess => {
            log::warn!(
                "page fault {:?} at {:#x} (user={})",
                error_code,
                fault_addr,
                from_user
            );
            kill_current_and_dispatch("unrecoverable page fault");
        }
    }
}

extern "x86-interrupt" fn invalid_opcode_handler(stack_frame: InterruptStackFrame) {
    if is_user_frame(&stack_frame) {
        kill_current_and_dispatch("invalid opcode");
    }
    panic!("EXCEPTION: INVALID OPCODE\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn general_protection_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) {
    if is_user_frame(&stack_frame) {
        log::warn!("general protection fault, error code {:#x}", error_code);
        kill_current_and_dispatch("general protection fault");
    }
    println!("EXCEPTION: GENERAL PROTECTION FAULT");
    println!("Error Code: {:#x}", error_code);
    println!("{:#?}", stack_frame);
    panic!("General protection fault");
}

extern "x86-interrupt" fn keyboard_interrupt_handler(_stack_frame: InterruptStackFrame) {
    let scancode: u8;
    // SAFETY: port 0x60 is the PS/2 data register; reading it is what
    // clears the output-buffer-full condition that raised this IRQ.
    unsafe {
        core::arch::asm!(
            "in al, dx",
            out("al") scancode,
            in("dx") 0x60u16,
            options(nomem, nostack)
        );
    }
    crate::drivers::keyboard::handle_scancode(scancode);
    crate::irq::notify_end_of_interrupt(crate::irq::PIC_OFFSET + crate::irq::KEYBOARD_IRQ);
}
