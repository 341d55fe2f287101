use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

/// Shader entry points compiled out of `mirror.hlsl`, together with their
/// target profile and the env var that hands the .cso path to `shaders.rs`.
const SHADER_ENTRIES: &[(&str, &str, &str)] = &[
    ("vs_main", "vs_5_0", "GLASS_MIRROR_VS_CSO"),
    ("ps_passthrough", "ps_5_0", "GLASS_MIRROR_PS_PASSTHROUGH_CSO"),
    ("ps_linear_srgb", "ps_5_0", "GLASS_MIRROR_PS_LINEAR_SRGB_CSO"),
    ("ps_tonemap", "ps_5_0", "GLASS_MIRROR_PS_TONEMAP_CSO"),
    ("ps_cursor", "ps_5_0", "GLASS_MIRROR_PS_CURSOR_CSO"),
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src/platform/windows/mirror.hlsl");
    println!("cargo:rustc-check-cfg=cfg(has_precompiled_shaders)");
    println!("cargo:rerun-if-env-changed=GLASS_MIRROR_FXC_PATH");
    println!("cargo:rerun-if-env-changed=GLASS_MIRROR_PRECOMPILE_SHADERS");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    if target_os != "windows" {
        return;
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let hlsl_path = PathBuf::from("src/platform/windows/mirror.hlsl");

    if !hlsl_path.exists() {
        return;
    }

    // Optional escape hatch:
    // GLASS_MIRROR_PRECOMPILE_SHADERS=0 disables build-time fxc compilation.
    let precompile_enabled = env::var("GLASS_MIRROR_PRECOMPILE_SHADERS")
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "0" || v == "false" || v == "no" || v == "off")
        })
        .unwrap_or(true);
    if !precompile_enabled {
        println!(
            "cargo:warning=GLASS_MIRROR_PRECOMPILE_SHADERS is disabled; will use runtime D3DCompile fallback"
        );
        return;
    }

    // All-or-nothing: the runtime loader either reads every stage from
    // embedded bytecode or compiles every stage with D3DCompile, so a
    // single failed entry point falls back for the whole set.
    let mut env_lines = Vec::new();
    for (entry, profile, env_name) in SHADER_ENTRIES {
        let cso_path = out_dir.join(format!("{entry}.cso"));
        match compile_with_fxc(&hlsl_path, &cso_path, entry, profile) {
            Ok(()) => env_lines.push(format!("cargo:rustc-env={env_name}={}", cso_path.display())),
            Err(detail) => {
                println!(
                    "cargo:warning=failed to precompile {entry} with fxc ({detail}); will use runtime D3DCompile fallback"
                );
                return;
            }
        }
    }
    for line in env_lines {
        println!("{line}");
    }
    println!("cargo:rustc-cfg=has_precompiled_shaders");
}

fn compile_with_fxc(
    hlsl_path: &Path,
    cso_path: &Path,
    entry_point: &str,
    profile: &str,
) -> Result<(), String> {
    let mut attempts = Vec::new();
    let mut attempted = false;
    for fxc in fxc_candidates() {
        if !is_path_lookup(&fxc) && !fxc.is_file() {
            continue;
        }
        attempted = true;
        match Command::new(&fxc)
            .args(["/T", profile, "/E", entry_point, "/O3", "/Fo"])
            .arg(cso_path)
            .arg(hlsl_path)
            .output()
        {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                attempts.push(format!("{}: {}", fxc.display(), summarize_output(&output)))
            }
            Err(err) => attempts.push(format!("{}: {}", fxc.display(), err)),
        }
    }

    if !attempted {
        return Err(
            "no usable fxc.exe found (PATH/Windows SDK). set GLASS_MIRROR_FXC_PATH to an explicit fxc path".to_string()
        );
    }

    Err(attempts.join(" | "))
}

fn is_path_lookup(path: &Path) -> bool {
    path.file_name().is_some()
        && path.parent().is_none()
        && path
            .file_name()
            .is_some_and(|name| name.eq_ignore_ascii_case("fxc.exe"))
}

fn summarize_output(output: &Output) -> String {
    let status = output
        .status
        .code()
        .map_or_else(|| "terminated".to_string(), |code| format!("exit {code}"));
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut diagnostic = if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        "no compiler diagnostic output".to_string()
    };
    if diagnostic.len() > 260 {
        diagnostic.truncate(260);
        diagnostic.push_str("...");
    }
    format!("{status}, {diagnostic}")
}

fn fxc_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(path) = env::var("GLASS_MIRROR_FXC_PATH") {
        let path = path.trim();
        if !path.is_empty() {
            out.push(PathBuf::from(path));
        }
    }

    out.push(PathBuf::from("fxc.exe"));

    if let Ok(bin_path) = env::var("WindowsSdkVerBinPath") {
        let bin = PathBuf::from(bin_path);
        out.push(bin.join("x64").join("fxc.exe"));
        out.push(bin.join("x86").join("fxc.exe"));
    }

    if let (Ok(sdk_dir), Ok(sdk_version)) =
        (env::var("WindowsSdkDir"), env::var("WindowsSDKVersion"))
    {
        let version = sdk_version.trim_matches(|c| c == '\\' || c == '/');
        if !version.is_empty() {
            let bin = PathBuf::from(sdk_dir).join("bin").join(version);
            out.push(bin.join("x64").join("fxc.exe"));
            out.push(bin.join("x86").join("fxc.exe"));
        }
    }

    out.extend(scan_windows_kits_fxc());

    dedup_paths(out)
}

fn scan_windows_kits_fxc() -> Vec<PathBuf> {
    let mut out = Vec::new();
    let Ok(program_files) = env::var("ProgramFiles(x86)") else {
        return out;
    };

    let bin_root = PathBuf::from(program_files)
        .join("Windows Kits")
        .join("10")
        .join("bin");
    let Ok(entries) = std::fs::read_dir(bin_root) else {
        return out;
    };

    let mut dirs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    dirs.reverse();

    for dir in dirs {
        out.push(dir.join("x64").join("fxc.exe"));
        out.push(dir.join("x86").join("fxc.exe"));
    }

    out
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut unique = Vec::new();
    for path in paths {
        if unique.iter().any(|seen| seen == &path) {
            continue;
        }
        unique.push(path);
    }
    unique
}
