use std::process::Command;

/// Short commit id baked into the binary as `PAYFLOW_BUILD`
fn build_id() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())?;
    let commit = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let modified = Command::new("git")
        .args(["status", "--porcelain", "--untracked-files=no"])
        .output()
        .map(|o| !o.stdout.is_empty())
        .unwrap_or(false);

    Some(if modified {
        format!("{}+local", commit)
    } else {
        commit
    })
}

fn main() {
    let build = build_id().unwrap_or_else(|| "dev".to_string());
    println!("cargo:rustc-env=PAYFLOW_BUILD={}", build);
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}
