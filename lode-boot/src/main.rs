//! lode loader binary
//!
//! Entry stubs, static storage and the panic handler. The boot logic lives
//! in the library.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(target_os = "none")]
mod rt {
    use lode_arch::{Architecture, Native};
    use lode_boot::assembler::Footprint;
    use lode_boot::boot::{self, Bringup, LoaderImage};
    use lode_boot::config::{CORE_STACK_SIZE, MAX_CORES, TABLE_FRAMES};
    use lode_boot::context::BootContext;
    use lode_boot::cores::{CoreStacks, WakeupTable};
    use lode_boot::images::{ImageManifest, ManifestLoader};
    use lode_boot::{logging, platform};
    use lode_common::{PhysAddr, SecondaryWakeup};
    use lode_pal::console::{self, Sink};
    use lode_pal::DEFAULT_REGISTRY;
    use lode_paging::PagingFormat;

    type Format = <Native as Architecture>::Format;
    type Context = BootContext<Format, TABLE_FRAMES, MAX_CORES>;

    static ARCH: Native = Native::new();
    static CONTEXT: Context = Context::new();
    static STACKS: CoreStacks<CORE_STACK_SIZE, MAX_CORES> = CoreStacks::new();
    static WAKEUPS: WakeupTable<MAX_CORES> = WakeupTable::new();

    #[used]
    #[unsafe(link_section = ".lode.manifest")]
    static MANIFEST: ImageManifest = ImageManifest::UNPATCHED;

    unsafe extern "C" {
        static __loader_start: u8;
        static __loader_end: u8;
    }

    #[cfg(target_arch = "aarch64")]
    const CONSOLE: Sink = Sink::Pl011(lode_boot::config::UART_BASE);

    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    const CONSOLE: Sink = Sink::Sbi;

    /// Hardware id of the boot core and device tree address from the entry
    /// registers.
    #[cfg(target_arch = "aarch64")]
    fn boot_args(arg0: usize, _arg1: usize) -> (u64, u64) {
        (lode_arch::cpu::hw_id(), arg0 as u64)
    }

    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    fn boot_args(arg0: usize, arg1: usize) -> (u64, u64) {
        (arg0 as u64, arg1 as u64)
    }

    fn footprint() -> Footprint {
        // SAFETY: Only the addresses of the linker symbols are taken
        let (start, end) = unsafe { (&raw const __loader_start, &raw const __loader_end) };
        let footprint = Footprint::new(start as usize as u64, end as usize as u64);
        match CONSOLE {
            Sink::Pl011(base) => footprint.with_console(base),
            _ => footprint,
        }
    }

    extern "C" fn primary_main(arg0: usize, arg1: usize) -> ! {
        let (hw_id, dtb) = boot_args(arg0, arg1);

        // SAFETY: The console device is reachable with translation off
        unsafe { console::init(CONSOLE) };
        logging::init();

        let footprint = footprint();
        log::info!(
            "lode {} ({}), loader {}..{}, boot core {:#x}",
            env!("CARGO_PKG_VERSION"),
            Format::NAME,
            footprint.start,
            footprint.end,
            hw_id
        );
        #[cfg(target_arch = "aarch64")]
        log::info!("running at EL{}", lode_arch::cpu::current_el());

        // SAFETY: The device tree address comes from the previous boot stage
        let platform = match unsafe {
            platform::discover::<MAX_CORES>(PhysAddr::new(dtb), hw_id, &DEFAULT_REGISTRY)
        } {
            Ok(platform) => platform,
            Err(err) => boot::fatal(&ARCH, err),
        };

        let image = LoaderImage {
            footprint,
            pc: PhysAddr::new(primary_main as usize as u64),
        };
        let bringup = Bringup {
            entry: PhysAddr::new(_secondary_start as usize as u64),
            stacks: &STACKS,
            wakeups: &WAKEUPS,
        };
        let mut loader = ManifestLoader::new(&MANIFEST);

        let err = boot::primary(&ARCH, &CONTEXT, &mut loader, image, &platform, &bringup);
        boot::fatal(&ARCH, err)
    }

    extern "C" fn secondary_main(wakeup: &'static SecondaryWakeup) -> ! {
        // SAFETY: The primary filled the block with the address of CONTEXT
        let err = unsafe { boot::secondary::<Native, TABLE_FRAMES, MAX_CORES>(&ARCH, wakeup) };
        boot::fatal(&ARCH, err)
    }

    /// Boot core entry.
    ///
    /// x0 = device tree. Drops from EL2 to EL1 if needed, zeroes `.bss` and
    /// switches to stack 0.
    #[cfg(target_arch = "aarch64")]
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.entry")]
    pub unsafe extern "C" fn _start() -> ! {
        core::arch::naked_asm!(
            "msr daifset, #0xf",

            // -- Leave EL2 if the firmware entered us there
            "mrs x9, CurrentEL",
            "cmp x9, #(2 << 2)",
            "b.ne 1f",
            "mov x9, #(1 << 31)",   // HCR_EL2.RW: EL1 is AArch64
            "msr hcr_el2, x9",
            "mov x9, #0x3c5",       // EL1h, DAIF masked
            "msr spsr_el2, x9",
            "adr x9, 1f",
            "msr elr_el2, x9",
            "eret",
            "1:",

            // -- Zero .bss
            "adrp x9, __bss_start",
            "add x9, x9, :lo12:__bss_start",
            "adrp x10, __bss_end",
            "add x10, x10, :lo12:__bss_end",
            "2:",
            "cmp x9, x10",
            "b.hs 3f",
            "str xzr, [x9], #8",
            "b 2b",
            "3:",

            // -- Stack 0
            "adrp x9, {stacks}",
            "add x9, x9, :lo12:{stacks}",
            "ldr x10, ={stack_size}",
            "add x9, x9, x10",
            "mov sp, x9",

            "bl {main}",
            "4:",
            "wfi",
            "b 4b",

            stacks = sym STACKS,
            stack_size = const CORE_STACK_SIZE,
            main = sym primary_main,
        );
    }

    /// Secondary core entry, started by PSCI with x0 = wake-up block.
    #[cfg(target_arch = "aarch64")]
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn _secondary_start() -> ! {
        core::arch::naked_asm!(
            "msr daifset, #0xf",

            "mrs x9, CurrentEL",
            "cmp x9, #(2 << 2)",
            "b.ne 1f",
            "mov x9, #(1 << 31)",
            "msr hcr_el2, x9",
            "mov x9, #0x3c5",
            "msr spsr_el2, x9",
            "adr x9, 1f",
            "msr elr_el2, x9",
            "eret",
            "1:",

            "ldr x9, [x0, #{stack_top}]",
            "mov sp, x9",
            "bl {main}",
            "2:",
            "wfi",
            "b 2b",

            stack_top = const SecondaryWakeup::STACK_TOP_OFFSET,
            main = sym secondary_main,
        );
    }

    #[cfg(target_arch = "riscv64")]
    macro_rules! load_word {
        () => {
            "ld"
        };
    }

    #[cfg(target_arch = "riscv32")]
    macro_rules! load_word {
        () => {
            "lw"
        };
    }

    /// Boot hart entry.
    ///
    /// a0 = hart id, a1 = device tree. Zeroes `.bss` and switches to stack 0.
    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    #[unsafe(link_section = ".text.entry")]
    pub unsafe extern "C" fn _start() -> ! {
        core::arch::naked_asm!(
            "csrw sie, zero",

            // -- Zero .bss
            "la t0, __bss_start",
            "la t1, __bss_end",
            "1:",
            "bgeu t0, t1, 2f",
            "sw zero, 0(t0)",
            "addi t0, t0, 4",
            "j 1b",
            "2:",

            // -- Stack 0
            "la sp, {stacks}",
            "li t0, {stack_size}",
            "add sp, sp, t0",

            "call {main}",
            "3:",
            "wfi",
            "j 3b",

            stacks = sym STACKS,
            stack_size = const CORE_STACK_SIZE,
            main = sym primary_main,
        );
    }

    /// Secondary hart entry, started by SBI HSM with a0 = hart id and
    /// a1 = wake-up block.
    #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
    #[unsafe(naked)]
    #[unsafe(no_mangle)]
    pub unsafe extern "C" fn _secondary_start() -> ! {
        core::arch::naked_asm!(
            "csrw sie, zero",
            concat!(load_word!(), " sp, {stack_top}(a1)"),
            "mv a0, a1",
            "call {main}",
            "1:",
            "wfi",
            "j 1b",

            stack_top = const SecondaryWakeup::STACK_TOP_OFFSET,
            main = sym secondary_main,
        );
    }

    #[panic_handler]
    fn panic(info: &core::panic::PanicInfo<'_>) -> ! {
        log::error!("LOADER PANIC: {}", info);
        ARCH.halt()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    println!("lode-boot is a bare-metal loader; build it for a `*-none-elf` target");
}
