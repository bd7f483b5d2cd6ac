use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use mitsuba_bridge::config::{Axis, ExportOptions, ImportOptions};
use mitsuba_bridge::host::{load_host_scene_from_path, save_host_scene};
use mitsuba_bridge::report::Report;
use mitsuba_bridge::{export, import};

const USAGE: &str = "usage:
  mitsuba-bridge export --host-json <scene.json> --output <scene.xml> [--split-files] [--export-ids] [--selection] [--config <options.json>] [--axis-forward <axis>] [--axis-up <axis>]
  mitsuba-bridge import --xml <scene.xml> --host-json-out <scene.json> [--config <options.json>] [--host-version <major.minor.patch>] [--axis-forward <axis>] [--axis-up <axis>]
  mitsuba-bridge dump --host-json <scene.json> [--selection] [--config <options.json>]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Command {
    #[default]
    Help,
    Export,
    Import,
    Dump,
}

#[derive(Debug, Default, Clone)]
struct Cli {
    command: Command,
    host_json: Option<PathBuf>,
    output: Option<PathBuf>,
    xml: Option<PathBuf>,
    host_json_out: Option<PathBuf>,
    config: Option<PathBuf>,
    split_files: bool,
    export_ids: bool,
    selection: bool,
    axis_forward: Option<Axis>,
    axis_up: Option<Axis>,
    host_version: Option<[u32; 3]>,
}

fn parse_version(s: &str) -> Result<[u32; 3]> {
    let parts: Vec<u32> = s
        .split('.')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow!("invalid host version '{s}': {e}"))?;
    match parts.as_slice() {
        [major, minor] => Ok([*major, *minor, 0]),
        [major, minor, patch] => Ok([*major, *minor, *patch]),
        _ => Err(anyhow!("invalid host version '{s}' (expected major.minor[.patch])")),
    }
}

fn parse_cli(args: &[String]) -> Result<Cli> {
    let mut cli = Cli::default();
    let Some(first) = args.first() else {
        return Ok(cli);
    };
    cli.command = match first.as_str() {
        "export" => Command::Export,
        "import" => Command::Import,
        "dump" => Command::Dump,
        "-h" | "--help" | "help" => return Ok(cli),
        other => return Err(anyhow!("unknown command: {other}\n{USAGE}")),
    };
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--split-files" => cli.split_files = true,
            "--export-ids" => cli.export_ids = true,
            "--selection" => cli.selection = true,
            flag @ ("--host-json" | "--output" | "--xml" | "--host-json-out" | "--config"
            | "--axis-forward" | "--axis-up" | "--host-version") => {
                let v = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow!("missing value for {flag}"))?;
                match flag {
                    "--host-json" => cli.host_json = Some(PathBuf::from(v)),
                    "--output" => cli.output = Some(PathBuf::from(v)),
                    "--xml" => cli.xml = Some(PathBuf::from(v)),
                    "--host-json-out" => cli.host_json_out = Some(PathBuf::from(v)),
                    "--config" => cli.config = Some(PathBuf::from(v)),
                    "--axis-forward" => cli.axis_forward = Some(Axis::parse(v)?),
                    "--axis-up" => cli.axis_up = Some(Axis::parse(v)?),
                    _ => cli.host_version = Some(parse_version(v)?),
                }
                i += 1;
            }
            other => return Err(anyhow!("unknown argument: {other}\n{USAGE}")),
        }
        i += 1;
    }
    Ok(cli)
}

fn require<'a>(path: &'a Option<PathBuf>, flag: &str) -> Result<&'a Path> {
    path.as_deref()
        .ok_or_else(|| anyhow!("{flag} is required\n{USAGE}"))
}

fn print_report(tag: &str, report: &Report) {
    for w in &report.warnings {
        println!("[{tag}] warning: {w}");
    }
    for e in &report.errors {
        println!("[{tag}] error: {e}");
    }
}

fn run_export(cli: &Cli) -> Result<()> {
    let host_json = require(&cli.host_json, "--host-json")?;
    let output = require(&cli.output, "--output")?;
    let mut options = match &cli.config {
        Some(path) => ExportOptions::load(path)?,
        None => ExportOptions::default(),
    };
    options.split_files |= cli.split_files;
    options.export_ids |= cli.export_ids;
    options.use_selection |= cli.selection;
    if let Some(axis) = cli.axis_forward {
        options.axis_forward = axis;
    }
    if let Some(axis) = cli.axis_up {
        options.axis_up = axis;
    }
    let host = load_host_scene_from_path(host_json)?;
    let source_dir = host_json.parent().unwrap_or_else(|| Path::new("."));
    let exported = export::export_to_xml(&host, options, output, source_dir)?;
    print_report("export", &exported.report);
    println!(
        "[export] saved: {} ({} entries)",
        output.display(),
        exported.scene.len()
    );
    Ok(())
}

fn run_import(cli: &Cli) -> Result<()> {
    let xml = require(&cli.xml, "--xml")?;
    let out = require(&cli.host_json_out, "--host-json-out")?;
    let mut options = match &cli.config {
        Some(path) => ImportOptions::load(path)?,
        None => ImportOptions::default(),
    };
    if let Some(axis) = cli.axis_forward {
        options.axis_forward = axis;
    }
    if let Some(axis) = cli.axis_up {
        options.axis_up = axis;
    }
    if let Some(version) = cli.host_version {
        options.host_version = version;
    }
    let imported = import::import_xml_file(xml, options)?;
    print_report("import", &imported.report);
    save_host_scene(&imported.scene, out)
        .with_context(|| format!("failed to write host scene {}", out.display()))?;
    println!(
        "[import] saved: {} ({} objects, {} materials)",
        out.display(),
        imported.scene.objects.len(),
        imported.scene.materials.len()
    );
    Ok(())
}

fn run_dump(cli: &Cli) -> Result<()> {
    let host_json = require(&cli.host_json, "--host-json")?;
    let mut options = match &cli.config {
        Some(path) => ExportOptions::load(path)?,
        None => ExportOptions::default(),
    };
    options.use_selection |= cli.selection;
    let host = load_host_scene_from_path(host_json)?;
    let source_dir = host_json.parent().unwrap_or_else(|| Path::new("."));
    let exported = export::export_scene(&host, options, None, source_dir)?;
    for w in &exported.report.warnings {
        log::warn!("{w}");
    }
    for e in &exported.report.errors {
        log::error!("{e}");
    }
    let json = serde_json::to_string_pretty(&exported.scene).context("failed to serialize scene")?;
    println!("{json}");
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let argv: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli(&argv)?;
    match cli.command {
        Command::Help => {
            println!("{USAGE}");
            Ok(())
        }
        Command::Export => run_export(&cli),
        Command::Import => run_import(&cli),
        Command::Dump => run_dump(&cli),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn export_flags_parse() {
        let cli = parse_cli(&args(&[
            "export",
            "--host-json",
            "scene.json",
            "--output",
            "out/scene.xml",
            "--split-files",
            "--axis-up",
            "Z",
        ]))
        .unwrap();
        assert_eq!(cli.command, Command::Export);
        assert_eq!(cli.output, Some(PathBuf::from("out/scene.xml")));
        assert!(cli.split_files);
        assert_eq!(cli.axis_up, Some(Axis::Z));
    }

    #[test]
    fn missing_values_and_unknown_flags_are_errors() {
        assert!(parse_cli(&args(&["import", "--xml"])).is_err());
        assert!(parse_cli(&args(&["import", "--bogus"])).is_err());
        assert!(parse_cli(&args(&["render"])).is_err());
    }

    #[test]
    fn host_versions_parse() {
        assert_eq!(parse_version("4.2").unwrap(), [4, 2, 0]);
        assert_eq!(parse_version("3.6.5").unwrap(), [3, 6, 5]);
        assert!(parse_version("four").is_err());
    }
}
