use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};

const EBPF_PROGRAMS: &[&str] = &["tc-ipsec"];

const BPF_TARGET: &str = "bpfel-unknown-none";

pub fn build_all(release: bool) -> Result<()> {
    let xtask_dir = match std::env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => std::env::current_dir().context("failed to get cwd")?,
    };
    let crates_dir = xtask_dir.parent().unwrap_or(&xtask_dir).to_path_buf();
    let workspace_root = crates_dir.parent().unwrap_or(&crates_dir).to_path_buf();

    let profile = if release { "release" } else { "debug" };

    // The agent falls back to this directory when ebpf_program_dir is unset.
    let output_dir = workspace_root.join("target").join(BPF_TARGET).join(profile);
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create output dir {}", output_dir.display()))?;

    for program in EBPF_PROGRAMS {
        let program_dir = crates_dir.join("ebpf-programs").join(program);
        build_program(&program_dir, program, release)?;

        let src = program_dir
            .join("target")
            .join(BPF_TARGET)
            .join(profile)
            .join(program);
        let dst = output_dir.join(program);
        std::fs::copy(&src, &dst)
            .with_context(|| format!("failed to copy {} -> {}", src.display(), dst.display()))?;
        println!("  -> {}", dst.display());
    }

    println!("eBPF programs built ({profile})");
    Ok(())
}

fn build_program(program_dir: &Path, program: &str, release: bool) -> Result<()> {
    println!("Building eBPF program: {program}");

    let mut cmd = Command::new("cargo");
    cmd.arg("+nightly")
        .arg("build")
        .arg("-Z")
        .arg("build-std=core")
        .arg("--target")
        .arg(BPF_TARGET)
        .env(
            "CARGO_ENCODED_RUSTFLAGS",
            "-C\x1fdebuginfo=2\x1f-C\x1flink-arg=--btf",
        )
        .current_dir(program_dir);
    if release {
        cmd.arg("--release");
    }

    let status = cmd
        .status()
        .with_context(|| format!("failed to run cargo for {program}"))?;
    if !status.success() {
        anyhow::bail!("eBPF build failed for {program}");
    }
    Ok(())
}
