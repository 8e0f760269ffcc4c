fn main() {
    // The ESP-IDF build system is only wired in when cross-compiling for the
    // Xtensa architecture; host builds and tests need no toolchain setup.
    if let Ok(target) = std::env::var("TARGET") {
        if target.contains("xtensa") {
            embuild::espidf::sysenv::output();
        }
    }
}
