use std::process::Command;

fn main() {
    // Short git SHA, logged by JNI_OnLoad so field logs can be matched to a build.
    let sha = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=BRIDGE_GIT_SHA={sha}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "linked-sdk")]
    link_vendor_sdk();
}

/// Compile the C ABI shim and link the vendor library after it.
///
/// `TOKENX_SDK_LIB_DIR` adds a search path; `TOKENX_SDK_LIB` overrides the
/// library name (default `tokenx_connect`).
#[cfg(feature = "linked-sdk")]
fn link_vendor_sdk() {
    println!("cargo:rerun-if-changed=native/tokenx_shim.cpp");
    println!("cargo:rerun-if-env-changed=TOKENX_SDK_LIB_DIR");
    println!("cargo:rerun-if-env-changed=TOKENX_SDK_LIB");

    cc::Build::new()
        .cpp(true)
        .std("c++17")
        .warnings(false)
        .file("native/tokenx_shim.cpp")
        .compile("tokenx_shim");

    if let Ok(dir) = std::env::var("TOKENX_SDK_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    let lib = std::env::var("TOKENX_SDK_LIB").unwrap_or_else(|_| "tokenx_connect".into());
    println!("cargo:rustc-link-lib=dylib={lib}");
}
