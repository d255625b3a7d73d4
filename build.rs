use std::process::Command;

/// Run a command and capture its trimmed stdout, or None if it fails.
fn capture(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn main() {
    let commit_sha = capture("git", &["rev-parse", "--short", "HEAD"]);
    let build_date = capture("date", &["+%Y-%m-%d"]);

    // "rustc 1.92.0 (...)" -> "1.92.0"
    let rustc_version = capture("rustc", &["--version"]).and_then(|line| {
        line.strip_prefix("rustc ")?
            .split_whitespace()
            .next()
            .map(String::from)
    });

    for (key, value) in [
        ("VIGIL_COMMIT_SHA", commit_sha),
        ("VIGIL_BUILD_DATE", build_date),
        ("VIGIL_RUSTC_VERSION", rustc_version),
    ] {
        println!(
            "cargo:rustc-env={}={}",
            key,
            value.as_deref().unwrap_or("unknown")
        );
    }

    // Rebuild if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=VIGIL_COMMIT_SHA");
}
