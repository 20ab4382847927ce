//! Generate UniFFI Kotlin bindings for the Android app
//!
//! Run: cargo run --bin generate-bindings
//!
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │ DEPENDENCY MAP - Output paths must match app/build.gradle.kts expectations  │
//! │                                                                             │
//! │ Inputs:                                                                     │
//! │   target/release/libwikisearch.so              ← Built library for bindgen  │
//! │                                                                             │
//! │ Outputs:                                                                    │
//! │   app/src/main/java/uniffi/wikisearch/wikisearch.kt  ← Kotlin bindings      │
//! │   app/src/main/jniLibs/<abi>/libwikisearch.so        ← Per-ABI libraries    │
//! └─────────────────────────────────────────────────────────────────────────────┘

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Android ABI directory name and the Rust target that builds it
const ANDROID_TARGETS: &[(&str, &str)] = &[
    ("arm64-v8a", "aarch64-linux-android"),
    ("armeabi-v7a", "armv7-linux-androideabi"),
    ("x86_64", "x86_64-linux-android"),
];

fn main() {
    let rust_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let project_root = rust_dir.parent().expect("No parent directory");
    let target_dir = project_root.join("target");

    println!("Building Rust library...");
    run_cmd("cargo", &["build", "--release", "--lib"], &rust_dir);

    println!("Generating Kotlin bindings...");
    let library = target_dir.join("release/libwikisearch.so");
    let generated = rust_dir.join("generated");
    run_cmd(
        "cargo",
        &[
            "run",
            "--bin",
            "uniffi-bindgen",
            "generate",
            "--library",
            &library.to_string_lossy(),
            "--language",
            "kotlin",
            "--out-dir",
            &generated.to_string_lossy(),
        ],
        &rust_dir,
    );

    let kotlin_dest = project_root.join("app/src/main/java/uniffi/wikisearch");
    fs::create_dir_all(&kotlin_dest).expect("Create Kotlin output dir");
    fs::copy(
        generated.join("uniffi/wikisearch/wikisearch.kt"),
        kotlin_dest.join("wikisearch.kt"),
    )
    .expect("Copy Kotlin bindings");

    // Per-ABI shared libraries; needs the NDK linker configured for each target
    println!("Building Android libraries...");
    let jni_libs = project_root.join("app/src/main/jniLibs");
    for (abi, target) in ANDROID_TARGETS {
        run_cmd("cargo", &["build", "--release", "--lib", "--target", target], &rust_dir);
        let abi_dir = jni_libs.join(abi);
        fs::create_dir_all(&abi_dir).expect("Create jniLibs dir");
        fs::copy(
            target_dir.join(target).join("release/libwikisearch.so"),
            abi_dir.join("libwikisearch.so"),
        )
        .expect("Copy shared library");
    }

    println!("Done! Bindings regenerated successfully.");
    println!("Generated files:");
    println!("  - {}/wikisearch.kt (UniFFI generated)", kotlin_dest.display());
    for (abi, _) in ANDROID_TARGETS {
        println!("  - {}/{}/libwikisearch.so", jni_libs.display(), abi);
    }
}

fn run_cmd(program: &str, args: &[&str], dir: &Path) {
    let status = Command::new(program)
        .args(args)
        .current_dir(dir)
        .status()
        .unwrap_or_else(|e| panic!("Failed to run {}: {}", program, e));

    if !status.success() {
        panic!("{} failed with status: {}", program, status);
    }
}
