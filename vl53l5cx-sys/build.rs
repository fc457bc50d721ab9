//! Build script for vl53l5cx-sys FFI bindings.
//!
//! With the `uld-sdk` feature the bindings are generated from the ST
//! ultra-lite driver headers and the crate links `libvl53l5cx_uld`.
//! Without it only the layout constants are emitted so the workspace
//! builds on machines that do not carry the vendor sources.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=wrapper.h");
    println!("cargo:rerun-if-env-changed=VL53L5CX_ULD_DIR");

    #[cfg(feature = "uld-sdk")]
    generate_bindings();

    #[cfg(not(feature = "uld-sdk"))]
    generate_dummy_bindings();

    #[cfg(feature = "uld-sdk")]
    {
        if pkg_config::probe_library("vl53l5cx_uld").is_ok() {
            return;
        }

        println!("cargo:rustc-link-lib=vl53l5cx_uld");

        if let Ok(dir) = env::var("VL53L5CX_ULD_DIR") {
            println!("cargo:rustc-link-search=native={}/lib", dir);
        }
        for path in ["/usr/local/lib", "/usr/lib"] {
            if std::path::Path::new(path)
                .join("libvl53l5cx_uld.a")
                .exists()
                || std::path::Path::new(path)
                    .join("libvl53l5cx_uld.so")
                    .exists()
            {
                println!("cargo:rustc-link-search=native={}", path);
                break;
            }
        }
    }
}

#[cfg(feature = "uld-sdk")]
fn generate_bindings() {
    let uld_dir = env::var("VL53L5CX_ULD_DIR").unwrap_or_else(|_| "/usr/local".to_string());
    let include_dirs = [
        format!("{}/include", uld_dir),
        format!("{}/inc", uld_dir),
        format!("{}/platform", uld_dir),
    ];

    let mut builder = bindgen::Builder::default().header("wrapper.h");
    for dir in &include_dirs {
        println!("cargo:rerun-if-changed={}/vl53l5cx_api.h", dir);
        builder = builder.clang_arg(format!("-I{}", dir));
    }

    let bindings = builder
        .allowlist_function("vl53l5cx_.*")
        .allowlist_type("VL53L5CX_.*")
        .allowlist_var("VL53L5CX_.*")
        .derive_debug(false)
        .derive_default(false)
        .layout_tests(false)
        .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
        .generate()
        .expect("Unable to generate VL53L5CX bindings");

    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    bindings
        .write_to_file(out_path.join("bindings.rs"))
        .expect("Couldn't write bindings!");
}

/// Emit the constants that describe the published data layout only.
/// No driver entry points exist without the vendor library.
#[cfg(not(feature = "uld-sdk"))]
fn generate_dummy_bindings() {
    let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
    let dummy = r#"
// uld-sdk feature not enabled: layout constants only.

pub const VL53L5CX_DEFAULT_I2C_ADDRESS: u32 = 0x52;
pub const VL53L5CX_RESOLUTION_4X4: u32 = 16;
pub const VL53L5CX_RESOLUTION_8X8: u32 = 64;
pub const VL53L5CX_NB_TARGET_PER_ZONE: u32 = 1;
pub const VL53L5CX_STATUS_OK: u32 = 0;
"#;

    std::fs::write(out_path.join("bindings.rs"), dummy).expect("Couldn't write dummy bindings!");
}
