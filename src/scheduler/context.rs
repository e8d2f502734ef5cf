/*
 * Context Save and Restore
 *
 * The primitive underneath every context switch. A `RegisterFrame` holds
 * the callee-saved registers plus stack pointer and resume address; saving
 * returns 0, and restoring transfers control back to the instruction after
 * the save with a caller-chosen non-zero value appearing as the save's
 * return value. A `Context` couples the frame with the signal mask that
 * was in force when it was saved.
 *
 * The caller that saves a frame must still be on the same stack, in the
 * same activation, when it hands control away: the restored stack pointer
 * points into that activation. The scheduler's switch paths save and then
 * dispatch without returning in between, which keeps the frame alive.
 */

use std::ptr;

use super::signal;

/// `save_registers` return value on the direct path.
pub const SAVED: u64 = 0;

/// Value `save_registers` appears to return when its frame is resumed.
pub const RESUMED: u64 = 1;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Callee-saved register file per the System V x86_64 ABI, plus
        /// the stack pointer and resume address. Field order is fixed:
        /// the assembly below addresses fields by byte offset.
        #[repr(C)]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct RegisterFrame {
            pub rbx: u64, // 0x00
            pub rbp: u64, // 0x08
            pub r12: u64, // 0x10
            pub r13: u64, // 0x18
            pub r14: u64, // 0x20
            pub r15: u64, // 0x28
            pub rsp: u64, // 0x30
            pub rip: u64, // 0x38
        }

        const _: () = assert!(size_of::<RegisterFrame>() == 64);

        /// Store the current execution point into `frame` and return
        /// `SAVED`. Resuming the frame makes this call appear to return
        /// again with the tag passed to `load_registers`.
        ///
        /// The saved rsp is the caller's stack pointer as it will be after
        /// this call returns; the saved rip is the return address.
        #[unsafe(naked)]
        pub unsafe extern "C" fn save_registers(frame: *mut RegisterFrame) -> u64 {
            core::arch::naked_asm!(
                "mov [rdi + 0x00], rbx",
                "mov [rdi + 0x08], rbp",
                "mov [rdi + 0x10], r12",
                "mov [rdi + 0x18], r13",
                "mov [rdi + 0x20], r14",
                "mov [rdi + 0x28], r15",
                "lea rax, [rsp + 8]",
                "mov [rdi + 0x30], rax",
                "mov rax, [rsp]",
                "mov [rdi + 0x38], rax",
                "xor eax, eax",
                "ret",
            )
        }

        /// Reload `frame` and jump to its resume address with `tag` in the
        /// return-value register. Never returns.
        #[unsafe(naked)]
        pub unsafe extern "C" fn load_registers(frame: *const RegisterFrame, tag: u64) -> ! {
            core::arch::naked_asm!(
                "mov rbx, [rdi + 0x00]",
                "mov rbp, [rdi + 0x08]",
                "mov r12, [rdi + 0x10]",
                "mov r13, [rdi + 0x18]",
                "mov r14, [rdi + 0x20]",
                "mov r15, [rdi + 0x28]",
                "mov rsp, [rdi + 0x30]",
                "mov rax, rsi",
                "jmp qword ptr [rdi + 0x38]",
            )
        }
    } else {
        compile_error!("the context-switch primitive is only implemented for x86_64");
    }
}

/// Saved CPU context of a suspended thread: register frame plus the
/// signal mask to reinstate when the thread next runs.
pub struct Context {
    pub regs: RegisterFrame,
    pub mask: libc::sigset_t,
}

impl Context {
    /// Context with nothing saved yet. The main thread starts with one of
    /// these; its first preemption fills it in.
    pub fn blank() -> Self {
        Self {
            regs: RegisterFrame::default(),
            mask: signal::empty_sigset(),
        }
    }

    /// Context for the first dispatch of a spawned thread: stack pointer
    /// at the top of its fresh stack, resume address at `entry_rip`.
    ///
    /// The saved mask keeps the preemption signal blocked; the thread
    /// trampoline unblocks it after the jump has landed, so there is no
    /// window in which the timer can fire between mask restore and jump.
    pub fn for_entry(sp: u64, entry_rip: u64) -> Self {
        let mut ctx = Self::blank();
        ctx.regs.rsp = sp;
        ctx.regs.rip = entry_rip;
        ctx.mask = signal::preempt_sigset();
        ctx
    }

    /// Snapshot the calling thread's current signal mask into this
    /// context. Done immediately before saving the register frame.
    pub fn capture_mask(&mut self) {
        if unsafe { libc::sigprocmask(libc::SIG_BLOCK, ptr::null(), &mut self.mask) } < 0 {
            super::fatal_system_error("failed to read the signal mask");
        }
    }
}

/// Reinstate `ctx`'s signal mask and resume its register frame.
///
/// # Safety
///
/// `ctx` must have been filled by `save_registers` on a stack that is
/// still intact, or by `Context::for_entry` over a live stack buffer.
pub unsafe fn restore(ctx: *const Context) -> ! {
    unsafe {
        if libc::sigprocmask(libc::SIG_SETMASK, &(*ctx).mask, ptr::null_mut()) < 0 {
            super::fatal_system_error("failed to restore the signal mask");
        }
        load_registers(&(*ctx).regs, RESUMED)
    }
}
