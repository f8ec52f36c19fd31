use std::env;

/// ABIs the APK ships a `libopenxr_loader.so` for.
const PACKAGED_ARCHES: [&str; 2] = ["arm", "aarch64"];

fn main() {
    println!("cargo::rustc-check-cfg=cfg(xr_packaged_abi)");
    println!("cargo:rerun-if-env-changed=CARGO_CFG_TARGET_OS");
    println!("cargo:rerun-if-env-changed=CARGO_CFG_TARGET_ARCH");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    if target_os != "android" {
        return;
    }

    if PACKAGED_ARCHES.contains(&target_arch.as_str()) {
        println!("cargo:rustc-cfg=xr_packaged_abi");
    } else {
        println!(
            "cargo:warning=no OpenXR loader is packaged for android/{target_arch}; initialization will report an unsupported device"
        );
    }
}
