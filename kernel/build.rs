use std::process::Command;

fn main() {
    // Get git hash
    let git_hash = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0000000000000000000000000000000000000000".to_string());

    println!("cargo:rustc-env=GIT_HASH={}", git_hash.trim());

    // Get build timestamp
    let build_timestamp = Command::new("date")
        .args(["+%s"])
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .unwrap_or_else(|| "0".to_string());

    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", build_timestamp.trim());

    // bootloader_api 0.11 handles loading and virtual-memory layout for us;
    // no custom linker script is needed for x86_64-unknown-none.
}
