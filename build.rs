use std::fs;
use std::path::{Path, PathBuf};

/// Directory whose contents are deployed into every album.
const RUNTIME_DIR: &str = "assets/runtime";

fn main() {
    // Re-run if git HEAD changes (new commits, checkouts, etc.)
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/");
    println!("cargo:rerun-if-changed={RUNTIME_DIR}");

    let hash = std::process::Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_default();

    let on_tag = std::process::Command::new("git")
        .args(["describe", "--exact-match", "--tags", "HEAD"])
        .output()
        .ok()
        .is_some_and(|o| o.status.success());

    println!("cargo:rustc-env=GIT_HASH={hash}");
    println!("cargo:rustc-env=ON_RELEASE_TAG={on_tag}");

    let out_dir = PathBuf::from(std::env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));
    let bundle = pack_runtime(Path::new(RUNTIME_DIR));
    fs::write(out_dir.join("runtime.bundle"), bundle).expect("write runtime bundle");
}

/// Pack every file under `root` as `<len><path><len><data>` records.
///
/// Lengths are written as `0x` followed by eight hex digits, the layout
/// `photo_album::bundle::unpack` reads back.
fn pack_runtime(root: &Path) -> Vec<u8> {
    let mut files = Vec::new();
    collect_files(root, &mut files);
    files.sort();

    let mut out = Vec::new();
    for file in files {
        let relative = file
            .strip_prefix(root)
            .expect("collected below root")
            .to_string_lossy()
            .replace('\\', "/");
        let data = fs::read(&file).expect("read runtime asset");
        out.extend_from_slice(format!("0x{:08x}", relative.len()).as_bytes());
        out.extend_from_slice(relative.as_bytes());
        out.extend_from_slice(format!("0x{:08x}", data.len()).as_bytes());
        out.extend_from_slice(&data);
        println!("cargo:rerun-if-changed={}", file.display());
    }
    out
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(&path, files);
        } else {
            files.push(path);
        }
    }
}
