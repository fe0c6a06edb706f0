const LINKER_SCRIPT: &str = "kernel/src/linker/kernel.ld";

fn main() {
    println!("cargo:rerun-if-changed={}", LINKER_SCRIPT);
    println!("cargo:rustc-link-arg=--script={}", LINKER_SCRIPT);
}
