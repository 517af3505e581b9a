use anyhow::{Context, Result};
use change_detect::{now_rfc3339, ScanState};
use clap::{Args, Parser, Subcommand};
use config::ScanSection;
use describer::{available_profiles, AwsCliProvider, Provider};
use inventory_core::{FailureReport, OutputPaths, ResourceRecord, ScanConfig};
use reports::InventorySummary;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod config;

#[derive(Debug, Parser)]
#[command(name = "ecinventory", version, about = "ElastiCache inventory across AWS profiles and regions")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./ecinventory.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// List profiles found in the local AWS config and credentials files
    Profiles,
    /// Scan profiles and regions and write the inventory reports
    Scan(ScanArgs),
}

#[derive(Debug, Args, Default)]
struct ScanArgs {
    /// Regions to scan (space or comma separated)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    regions: Vec<String>,
    /// Tag keys to report as columns (default: Team)
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    tags: Vec<String>,
    /// Profile(s) to scan; repeatable or comma-separated. Default: every discovered profile.
    #[arg(long)]
    profile: Vec<String>,
    /// Also report replication groups
    #[arg(long, overrides_with = "no_include_replication_groups")]
    include_replication_groups: bool,
    /// Do not report replication groups, even if the config file enables them
    #[arg(long = "no-include-replication-groups", overrides_with = "include_replication_groups")]
    no_include_replication_groups: bool,
    /// Fetch per-node detail (exact group node counts and creation times; slower)
    #[arg(long, overrides_with = "no_node_info")]
    node_info: bool,
    /// Skip per-node detail, even if the config file enables it
    #[arg(long = "no-node-info", overrides_with = "node_info")]
    no_node_info: bool,
    /// Skip resources unchanged since the last scan
    #[arg(long, overrides_with = "no_incremental")]
    incremental: bool,
    /// Rebuild every resource, even if the config file enables incremental mode
    #[arg(long = "no-incremental", overrides_with = "incremental")]
    no_incremental: bool,
    /// Profiles scanned concurrently
    #[arg(long)]
    parallel_profiles: Option<usize>,
    /// Tag keys whose values count as a change in incremental mode
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    fingerprint_tags: Vec<String>,
    /// Directory for reports, state and logs
    #[arg(long)]
    output_dir: Option<PathBuf>,
    /// CSV file name (inside the output directory)
    #[arg(long)]
    out_csv: Option<String>,
    /// Also write JSON lines to this file name
    #[arg(long)]
    out_jsonl: Option<String>,
    /// Summary JSON file name
    #[arg(long)]
    out_summary: Option<String>,
    /// Replay a previous CSV report instead of calling AWS
    #[arg(long)]
    dry_run: bool,
    /// CSV to replay with --dry-run (default: the CSV output path)
    #[arg(long, value_name = "FILE")]
    sample_file: Option<PathBuf>,
    /// Debug-level console logging
    #[arg(long)]
    verbose: bool,
}

/// Comma-split, trimmed and de-duplicated in first-seen order.
fn determine_profiles(requested: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for p in requested.iter().flat_map(|p| p.split(',')) {
        let p = p.trim();
        if !p.is_empty() && !out.iter().any(|o| o == p) {
            out.push(p.to_string());
        }
    }
    out
}

/// `--no-x` wins, then `--x`, then the file, then the default.
fn toggle(on: bool, off: bool, file: Option<bool>, default: bool) -> bool {
    !off && (on || file.unwrap_or(default))
}

fn scan_config(args: &ScanArgs, file: &ScanSection) -> ScanConfig {
    let pick = |cli: &Vec<String>, file: &Option<Vec<String>>| {
        if cli.is_empty() { file.clone().unwrap_or_default() } else { cli.clone() }
    };
    let defaults = ScanConfig::default();
    ScanConfig {
        regions: pick(&args.regions, &file.regions),
        tags: pick(&args.tags, &file.tags),
        include_replication_groups: toggle(
            args.include_replication_groups,
            args.no_include_replication_groups,
            file.include_replication_groups,
            defaults.include_replication_groups,
        ),
        node_info: toggle(args.node_info, args.no_node_info, file.node_info, defaults.node_info),
        parallel_profiles: args.parallel_profiles.or(file.parallel_profiles).unwrap_or(defaults.parallel_profiles),
        incremental: toggle(args.incremental, args.no_incremental, file.incremental, defaults.incremental),
        fingerprint_tags: pick(&args.fingerprint_tags, &file.fingerprint_tags),
    }
}

fn output_paths(args: &ScanArgs, file: &ScanSection) -> OutputPaths {
    let dir = args.output_dir.clone().or_else(|| file.output_dir.clone()).unwrap_or_else(|| PathBuf::from("."));
    let mut paths = OutputPaths::in_dir(dir);
    if let Some(csv) = args.out_csv.clone().or_else(|| file.out_csv.clone()) {
        paths.csv = csv;
    }
    paths.jsonl = args.out_jsonl.clone().or_else(|| file.out_jsonl.clone());
    if let Some(summary) = args.out_summary.clone().or_else(|| file.out_summary.clone()) {
        paths.summary = summary;
    }
    paths
}

/// The error log accumulates across runs.
fn open_log(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Console honors RUST_LOG; the error log file keeps WARN and above.
fn init_logging(log_path: &Path, verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let file_layer = match open_log(log_path) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(LevelFilter::WARN),
        ),
        Err(err) => {
            eprintln!("Warning: could not open log file {}: {}", log_path.display(), err);
            None
        }
    };
    let console_layer = tracing_subscriber::fmt::layer().with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(file_layer).with(console_layer).try_init();
}

fn sort_records(records: &mut [ResourceRecord]) {
    records.sort_by(|a, b| a.identity().cmp(&b.identity()));
}

fn write_reports(paths: &OutputPaths, records: &[ResourceRecord], tags: &[String], profiles: &[String]) -> Result<()> {
    if records.is_empty() {
        info!("no resources found, skipping report output");
        return Ok(());
    }
    let csv_path = paths.csv_path();
    reports::write_csv(&csv_path, records, tags).with_context(|| format!("writing {}", csv_path.display()))?;
    if let Some(jsonl_path) = paths.jsonl_path() {
        reports::write_jsonl(&jsonl_path, records, tags).with_context(|| format!("writing {}", jsonl_path.display()))?;
    }
    let summary = InventorySummary::from_records(records, profiles);
    summary.log();
    let summary_path = paths.summary_path();
    summary.write(&summary_path).with_context(|| format!("writing {}", summary_path.display()))?;
    Ok(())
}

fn report_failures(paths: &OutputPaths, failures: &FailureReport) {
    if failures.is_empty() {
        return;
    }
    warn!(profiles = failures.len(), "some profiles failed");
    for (profile, reason) in failures.iter() {
        warn!(profile, "{reason}");
    }
    let path = paths.failures_path();
    if let Err(e) = reports::write_failures(&path, failures) {
        warn!(path = %path.display(), error = %e, "failed to write failures summary");
    }
}

fn run_scan(args: ScanArgs, file: ScanSection) -> Result<()> {
    let config = scan_config(&args, &file).validated()?;
    let paths = output_paths(&args, &file);
    fs::create_dir_all(&paths.output_dir)
        .with_context(|| format!("creating output directory {}", paths.output_dir.display()))?;
    init_logging(&paths.log_path(), args.verbose);

    let start = Instant::now();
    if args.dry_run {
        let sample = args.sample_file.clone().unwrap_or_else(|| paths.csv_path());
        info!(path = %sample.display(), "dry run: replaying sample report");
        let replay = reports::read_csv(&sample).with_context(|| format!("reading {}", sample.display()))?;
        let tags = if replay.tags.is_empty() { config.tags.clone() } else { replay.tags };
        let mut records = replay.records;
        sort_records(&mut records);
        let profiles = determine_profiles(&records.iter().map(|r| r.profile.clone()).collect::<Vec<_>>());
        write_reports(&paths, &records, &tags, &profiles)?;
        info!(rows = records.len(), elapsed_ms = start.elapsed().as_millis() as u64, "dry run complete");
        return Ok(());
    }

    let mut profiles = determine_profiles(&args.profile);
    if profiles.is_empty() {
        profiles = determine_profiles(&file.profiles.clone().unwrap_or_default());
    }
    if profiles.is_empty() {
        profiles = available_profiles();
    }
    info!(profiles = ?profiles, regions = ?config.regions, "scanning");

    let state_path = paths.state_path();
    let previous = Arc::new(ScanState::load(&state_path));
    let provider: Arc<dyn Provider> = Arc::new(AwsCliProvider::default());
    let config = Arc::new(config);
    let rt = tokio::runtime::Runtime::new()?;
    let mut outcome = rt.block_on(profile_scan::scan_profiles(
        provider,
        profiles.clone(),
        config.clone(),
        previous.clone(),
    ));

    sort_records(&mut outcome.records);
    write_reports(&paths, &outcome.records, &config.tags, &profiles)?;

    let next = outcome.next_state(&previous, &now_rfc3339());
    match next.save(&state_path) {
        Ok(()) => info!(path = %state_path.display(), resources = next.resource_count(), "saved scan state"),
        Err(e) => warn!(path = %state_path.display(), error = %e, "failed to save scan state"),
    }
    report_failures(&paths, &outcome.failures);
    info!(rows = outcome.records.len(), elapsed_ms = start.elapsed().as_millis() as u64, "scan complete");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded_cfg = config::load_config(cli.config.as_deref());
    match cli.command {
        Commands::Version => {
            println!("ecinventory {}", env!("CARGO_PKG_VERSION"));
            println!("inventory-core {}", inventory_core::version());
        }
        Commands::Profiles => {
            for p in available_profiles() {
                println!("{p}");
            }
        }
        Commands::Scan(args) => {
            let file = loaded_cfg.and_then(|c| c.scan).unwrap_or_default();
            run_scan(args, file)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use inventory_core::{ResourceKind, TagValue};

    fn parse(args: &[&str]) -> ScanArgs {
        let argv = ["ecinventory", "scan"].iter().chain(args.iter()).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Scan(a) => a,
            other => panic!("unexpected command {other:?}"),
        }
    }

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn profiles_split_and_deduplicated() {
        assert_eq!(determine_profiles(&s(&["a,b", " c ", "b", "a,,d"])), s(&["a", "b", "c", "d"]));
        assert!(determine_profiles(&[]).is_empty());
    }

    #[test]
    fn scan_flags_parse() {
        let args = parse(&[
            "--regions", "us-east-1", "sa-east-1",
            "--tags", "Team,Owner",
            "--profile", "a,b", "--profile", "c",
            "--include-replication-groups", "--parallel-profiles", "2", "--out-jsonl", "r.jsonl",
        ]);
        assert_eq!(args.regions, s(&["us-east-1", "sa-east-1"]));
        assert_eq!(args.tags, s(&["Team", "Owner"]));
        assert_eq!(determine_profiles(&args.profile), s(&["a", "b", "c"]));
        assert!(args.include_replication_groups);
        assert!(!args.node_info);
        assert_eq!(args.parallel_profiles, Some(2));
    }

    #[test]
    fn cli_overrides_file_overrides_default() {
        let file = ScanSection {
            regions: Some(s(&["eu-west-1"])),
            tags: Some(s(&["Owner"])),
            node_info: Some(true),
            parallel_profiles: Some(8),
            output_dir: Some(PathBuf::from("reports")),
            ..Default::default()
        };
        let args = parse(&["--regions", "us-east-1", "--parallel-profiles", "2"]);
        let cfg = scan_config(&args, &file).validated().unwrap();
        assert_eq!(cfg.regions, s(&["us-east-1"]));
        assert_eq!(cfg.tags, s(&["Owner"]));
        assert!(cfg.node_info);
        assert!(!cfg.include_replication_groups);
        assert_eq!(cfg.parallel_profiles, 2);

        let paths = output_paths(&args, &file);
        assert_eq!(paths.csv_path(), PathBuf::from("reports/elasticache_report.csv"));
        assert_eq!(paths.jsonl_path(), None);
    }

    #[test]
    fn missing_regions_rejected() {
        let err = scan_config(&parse(&[]), &ScanSection::default()).validated().unwrap_err();
        assert_eq!(err.to_string(), "At least one region must be specified");
    }

    #[test]
    fn negated_flags_turn_off_file_settings() {
        let file = ScanSection {
            regions: Some(s(&["eu-west-1"])),
            include_replication_groups: Some(true),
            node_info: Some(true),
            incremental: Some(true),
            ..Default::default()
        };
        let cfg = scan_config(&parse(&["--no-node-info", "--no-incremental"]), &file);
        assert!(!cfg.node_info);
        assert!(!cfg.incremental);
        assert!(cfg.include_replication_groups);

        let cfg = scan_config(&parse(&["--no-include-replication-groups"]), &file);
        assert!(!cfg.include_replication_groups);

        // the later of a flag and its negation wins
        let args = parse(&["--no-node-info", "--node-info"]);
        assert!(args.node_info && !args.no_node_info);
        assert!(scan_config(&args, &ScanSection::default()).node_info);
    }

    #[test]
    fn error_log_is_appended_not_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan_errors.log");
        std::fs::write(&path, "earlier run\n").unwrap();
        {
            use std::io::Write;
            let mut log = open_log(&path).unwrap();
            log.write_all(b"this run\n").unwrap();
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier run\nthis run\n");
    }

    #[test]
    fn records_sorted_by_identity() {
        let rec = |profile: &str, region: &str, id: &str| ResourceRecord {
            profile: profile.into(),
            account_id: String::new(),
            region: region.into(),
            kind: ResourceKind::Cluster,
            resource_id: id.into(),
            arn: String::new(),
            engine: String::new(),
            engine_version: String::new(),
            creation_time: String::new(),
            node_types: Default::default(),
            num_nodes: 0,
            at_rest_encryption: false,
            transit_encryption: false,
            tags: vec![("Team".into(), TagValue::NotFound)],
        };
        let mut records = vec![rec("b", "us-east-1", "c1"), rec("a", "us-west-2", "c1"), rec("a", "us-east-1", "c2")];
        sort_records(&mut records);
        let ids: Vec<_> = records.iter().map(|r| (r.profile.as_str(), r.region.as_str())).collect();
        assert_eq!(ids, vec![("a", "us-east-1"), ("a", "us-west-2"), ("b", "us-east-1")]);
    }

    #[test]
    fn dry_run_replays_sample() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("sample.csv");
        std::fs::write(
            &sample,
            "Profile,AccountId,Region,ResourceType,ResourceId,ARN,Engine,EngineVersion,CreationTime,NodeTypes,NumNodes,AtRestEncryptionEnabled,TransitEncryptionEnabled,Team\n\
             acctA,1,us-east-1,CacheCluster,c1,,redis,6.0.6,,cache.t3.medium,3,False,True,Infra\n",
        )
        .unwrap();
        let out = dir.path().join("out");
        let args = parse(&[
            "--regions", "us-east-1", "--dry-run",
            "--sample-file", sample.to_str().unwrap(),
            "--output-dir", out.to_str().unwrap(),
        ]);
        run_scan(args, ScanSection::default()).unwrap();
        let written = std::fs::read_to_string(out.join("elasticache_report.csv")).unwrap();
        assert!(written.contains("acctA,1,us-east-1,CacheCluster,c1"));
        assert!(out.join("elasticache_summary.json").exists());
        assert!(!out.join("scan_state.json").exists());
    }
}
