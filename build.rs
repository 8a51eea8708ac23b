use std::fs;
use std::path::Path;
use std::process::Command;

/// Run git in the package directory; `None` when git is missing or fails.
fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8(output.stdout)
        .ok()
        .map(|s| s.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let git_dir = Path::new(".git");
    if git_dir.exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
        println!("cargo:rerun-if-changed=.git/index");

        // A symbolic HEAD moves when the branch ref does
        if let Ok(head) = fs::read_to_string(".git/HEAD") {
            if let Some(ref_path) = head.strip_prefix("ref: ") {
                let full_ref_path = git_dir.join(ref_path.trim());
                if full_ref_path.exists() {
                    println!("cargo:rerun-if-changed={}", full_ref_path.display());
                }
            }
        }
    }

    let git_hash = match git(&["rev-parse", "--short", "HEAD"]) {
        Some(hash) => {
            let dirty = git(&["status", "--porcelain", "--untracked-files=no"])
                .is_some_and(|status| !status.is_empty());
            if dirty {
                format!("{}-dirty", hash)
            } else {
                hash
            }
        }
        None => "unknown".to_string(),
    };

    println!("cargo:rustc-env=GIT_HASH={}", git_hash);
}
