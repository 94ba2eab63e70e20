fn main() {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    // Only the bare-metal loader binary is linked with a script; host test
    // builds use the default layout.
    if target_os == "none" {
        let script = if target_arch == "aarch64" {
            "link-aarch64.ld"
        } else {
            "link-riscv.ld"
        };
        println!("cargo:rustc-link-arg-bins=-T{}/{}", manifest_dir, script);
    }

    println!("cargo:rerun-if-changed=link-aarch64.ld");
    println!("cargo:rerun-if-changed=link-riscv.ld");
}
