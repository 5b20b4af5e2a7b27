use std::process::Command;

/// Short commit hash of the working tree, `HMS_GIT_HASH` when building
/// outside a checkout (e.g. from a source tarball), "unknown" otherwise.
fn git_hash() -> String {
    if let Ok(hash) = std::env::var("HMS_GIT_HASH") {
        return hash;
    }

    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=GIT_HASH={}", git_hash());

    println!("cargo:rerun-if-env-changed=HMS_GIT_HASH");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");
}
