// =============================================================================
// GLCHECK - Check multi-stage shader files without a GPU
// =============================================================================
//
// Splits each file into its stages, compiles them and links them on the
// software device, printing what was found:
//
//   shaders/basic.glsl
//     vertex      212 bytes
//     fragment    148 bytes
//     ok
//
// USAGE:
//   glcheck [--config <file>] [--watch] [paths...]
//
// Paths default to `check.shaders` from glcheck.toml. With --watch the files
// are re-checked whenever they change.
//
// =============================================================================

use anyhow::{bail, Context, Result};
use glresource::config::Config;
use glresource::{split_stages, DeviceRef, Program, SoftDevice, StageKind, StagePipeline};
use notify::{EventKind, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        print_usage();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(),
    };
    init_logging(&config);

    let paths = if args.paths.is_empty() {
        config.check.shaders.clone()
    } else {
        args.paths.clone()
    };
    if paths.is_empty() {
        bail!("No shader files given. Pass paths or set check.shaders in glcheck.toml");
    }
    let required = config.required_stages()?;

    let failed = check_all(&paths, &config, &required);

    if args.watch || config.watch.enabled {
        return watch(&paths, &config, &required);
    }
    if failed > 0 {
        bail!("{} of {} file(s) failed", failed, paths.len());
    }
    Ok(())
}

/// Initialize logging; RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// COMMAND LINE
// =============================================================================

#[derive(Debug, Default)]
struct Args {
    paths: Vec<PathBuf>,
    config: Option<PathBuf>,
    watch: bool,
    help: bool,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--watch" | "-w" => parsed.watch = true,
                "--help" | "-h" => parsed.help = true,
                "--config" | "-c" => {
                    let path = args.next().context("--config needs a file argument")?;
                    parsed.config = Some(PathBuf::from(path));
                }
                flag if flag.starts_with('-') => bail!("Unknown option: {}", flag),
                path => parsed.paths.push(PathBuf::from(path)),
            }
        }
        Ok(parsed)
    }
}

fn print_usage() {
    println!("Usage: glcheck [--config <file>] [--watch] [paths...]");
    println!();
    println!("Checks multi-stage shader files (stages introduced by `#shader <kind>` lines).");
    println!("Without paths, the files listed in check.shaders of glcheck.toml are checked.");
}

// =============================================================================
// CHECKING
// =============================================================================

/// Check every file and print the results. Returns the number of failures.
fn check_all(paths: &[PathBuf], config: &Config, required: &[StageKind]) -> usize {
    let mut failed = 0;
    for path in paths {
        println!("{}", path.display());
        match check_file(path, config, required) {
            Ok(()) => println!("  ok"),
            Err(e) => {
                println!("  FAILED: {:#}", e);
                failed += 1;
            }
        }
    }
    println!("{}/{} file(s) passed", paths.len() - failed, paths.len());
    failed
}

fn check_file(path: &Path, config: &Config, required: &[StageKind]) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {:?}", path))?;

    let stages = split_stages(&text)?;
    for stage in &stages {
        println!("  {:<10} {:>6} bytes", stage.kind, stage.source.len());
    }

    let device: DeviceRef = SoftDevice::new();
    let mut pipeline = StagePipeline::new(device.clone());
    pipeline.init_from_source(&text)?;

    for kind in required {
        if pipeline.get(*kind).is_none() {
            bail!("Missing {} stage", kind);
        }
    }

    if config.check.link {
        let mut program = Program::new(device);
        program.init(&pipeline)?;
        log::debug!("Linked {:?} into program {}", path, program.handle());
    }
    Ok(())
}

// =============================================================================
// WATCH MODE
// =============================================================================

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Re-check files as they change. Parent directories are watched so files
/// replaced by editors on save are still picked up.
fn watch(paths: &[PathBuf], config: &Config, required: &[StageKind]) -> Result<()> {
    let watched: Vec<(PathBuf, &PathBuf)> = paths.iter().map(|p| (canonical(p), p)).collect();
    let dirs: BTreeSet<PathBuf> = watched
        .iter()
        .filter_map(|(full, _)| full.parent().map(Path::to_path_buf))
        .collect();

    let (tx, rx) = mpsc::channel::<notify::Result<notify::Event>>();
    let mut watcher = notify::recommended_watcher(tx).context("Failed to create file watcher")?;
    for dir in &dirs {
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", dir))?;
    }
    log::info!("Watching {} file(s), Ctrl-C to stop", paths.len());

    let debounce = config.debounce();
    while let Ok(event) = rx.recv() {
        let event = match event {
            Ok(event) => event,
            Err(e) => {
                log::warn!("Watch error: {}", e);
                continue;
            }
        };
        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
            continue;
        }

        // Editors often write a file in several steps; collect the burst
        let mut changed: BTreeSet<PathBuf> = event.paths.into_iter().collect();
        while let Ok(Ok(more)) = rx.recv_timeout(debounce) {
            changed.extend(more.paths);
        }

        let targets: Vec<PathBuf> = watched
            .iter()
            .filter(|(full, _)| changed.iter().any(|c| canonical(c) == *full))
            .map(|(_, original)| (*original).clone())
            .collect();
        if !targets.is_empty() {
            log::info!("{} file(s) changed", targets.len());
            check_all(&targets, config, required);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args> {
        Args::parse(list.iter().map(|s| s.to_string()))
    }

    #[test]
    fn parses_paths_and_flags() {
        let parsed = args(&["a.glsl", "--watch", "-c", "other.toml", "b.glsl"]).unwrap();
        assert_eq!(parsed.paths, vec![PathBuf::from("a.glsl"), PathBuf::from("b.glsl")]);
        assert!(parsed.watch);
        assert_eq!(parsed.config, Some(PathBuf::from("other.toml")));
    }

    #[test]
    fn rejects_unknown_flag() {
        assert!(args(&["--fast"]).is_err());
        assert!(args(&["--config"]).is_err());
    }

    #[test]
    fn checks_file_on_soft_device() {
        let path = std::env::temp_dir().join("glcheck_main_ok.glsl");
        std::fs::write(
            &path,
            "#shader vertex\nvoid main() {}\n#shader fragment\nvoid main() {}\n",
        )
        .unwrap();
        let config = Config::default();
        let required = config.required_stages().unwrap();
        check_file(&path, &config, &required).unwrap();

        std::fs::write(&path, "#shader fragment\nvoid main() {}\n").unwrap();
        let err = check_file(&path, &config, &required).unwrap_err();
        assert!(err.to_string().contains("vertex"));
        std::fs::remove_file(&path).ok();
    }
}
