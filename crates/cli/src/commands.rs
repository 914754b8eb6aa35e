//! `tractmap run | validate | verify`

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use tractmap_realloc::config::PipelineConfig;
use tractmap_realloc::export::{merged_to_csv, parse_result_table, report_json};
use tractmap_realloc::load::{parse_attribute_table, parse_geojson_layer};
use tractmap_realloc::pipeline::{self, PipelineInput, PipelineResult, SourceInput};
use tractmap_realloc::reallocate::MissingValuePolicy;
use tractmap_realloc::verify::{verify, ConservationCheck, Tolerance, VerifyOptions};

use crate::exit_codes::{EXIT_CONSERVATION, EXIT_IO};
use crate::CliError;

// ---------------------------------------------------------------------------
// File access
// ---------------------------------------------------------------------------

/// Reads inputs relative to the config file and fingerprints each one.
struct Inputs {
    base_dir: PathBuf,
    fingerprints: BTreeMap<String, String>,
}

impl Inputs {
    fn new(config_path: &Path) -> Self {
        let base_dir = config_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        Self { base_dir, fingerprints: BTreeMap::new() }
    }

    fn read(&mut self, file: &str) -> Result<String, CliError> {
        let path = self.base_dir.join(file);
        let text = read_file(&path)?;
        let digest = Sha256::digest(text.as_bytes());
        self.fingerprints.insert(file.to_string(), format!("sha256:{digest:x}"));
        debug!(file, bytes = text.len(), "read input");
        Ok(text)
    }

    /// Output paths from the config are relative to the config directory.
    fn resolve(&self, file: &str) -> PathBuf {
        self.base_dir.join(file)
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path)
        .map_err(|e| CliError::new(EXIT_IO, format!("cannot read {}: {e}", path.display())))
}

fn write_file(path: &Path, contents: &str) -> Result<(), CliError> {
    std::fs::write(path, contents)
        .map_err(|e| CliError::new(EXIT_IO, format!("cannot write {}: {e}", path.display())))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

fn load_config(path: &Path) -> Result<PipelineConfig, CliError> {
    let text = read_file(path)?;
    Ok(PipelineConfig::from_toml(&text)?)
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    csv_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let mut inputs = Inputs::new(&config_path);

    let target_text = inputs.read(&config.target.file)?;
    let target = parse_geojson_layer(&config.target.file, &target_text, Some(&config.crs))?;

    let mut vintages = HashMap::new();
    for vintage in &config.vintages {
        let text = inputs.read(&vintage.file)?;
        let layer = parse_geojson_layer(&vintage.file, &text, Some(&config.crs))?;
        let data = match &vintage.data {
            Some(join) => {
                let text = inputs.read(&join.file)?;
                Some(parse_attribute_table(&join.file, &text, &join.key)?)
            }
            None => None,
        };
        vintages.insert(vintage.label.clone(), SourceInput { layer, data });
    }
    info!(vintages = vintages.len(), targets = target.features.len(), "inputs loaded");

    let mut result = pipeline::run(&config, PipelineInput { target, vintages })?;
    result.meta.inputs = std::mem::take(&mut inputs.fingerprints);

    let csv_path = csv_file.or_else(|| config.output.csv.as_deref().map(|f| inputs.resolve(f)));
    if let Some(path) = &csv_path {
        write_file(path, &merged_to_csv(&result.merged)?)?;
    }

    let json_path = output_file.or_else(|| config.output.json.as_deref().map(|f| inputs.resolve(f)));
    if json_output || json_path.is_some() {
        let json = report_json(&result)?;
        if let Some(path) = &json_path {
            write_file(path, &json)?;
        }
        if json_output {
            println!("{json}");
        }
    }

    print_summary(&result);

    if config.fail_on_mismatch {
        result.ensure_conserved(&config.tolerance)?;
    } else if !result.mismatches().is_empty() {
        eprintln!("warning: fail_on_mismatch = false; exiting successfully despite mismatches");
    }
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    let m = &result.merged;
    eprintln!(
        "{}: {} vintages onto {} neighborhoods, {} columns",
        result.meta.name,
        result.vintages.len(),
        m.rows.len(),
        m.columns.len()
    );
    for v in &result.vintages {
        if v.filtered_out > 0 {
            eprintln!("  {}: {} tracts filtered out", v.label, v.filtered_out);
        }
        if let Some(join) = &v.join {
            if !join.unjoined.is_empty() {
                eprintln!("  {}: {} data rows matched no tract", v.label, join.unjoined.len());
            }
        }
        for c in &v.checks {
            eprintln!(
                "  {} {}: source {}, reallocated {}, delta {} (expected {}) {}",
                c.label,
                c.column,
                c.check.source_total,
                c.check.reallocated_total,
                c.check.delta,
                c.expected_delta,
                if c.matches_expected { "ok" } else { "MISMATCH" }
            );
        }
    }
    if !m.dropped.is_empty() {
        eprintln!("  {} ids outside the anchor vintage were dropped by the merge", m.dropped.len());
    }
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let fields: usize = config.vintages.iter().map(|v| v.fields.len()).sum();
    eprintln!(
        "valid: {} ({} vintages, {} fields, crs {})",
        config.name,
        config.vintages.len(),
        fields,
        config.crs
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// verify
// ---------------------------------------------------------------------------

pub struct VerifyArgs {
    pub source: PathBuf,
    pub result: PathBuf,
    pub source_field: String,
    pub result_field: String,
    pub id_column: Option<String>,
    pub expected_delta: f64,
    pub missing_as_zero: bool,
    pub json: bool,
}

#[derive(Serialize)]
struct VerifyReport<'a> {
    source: String,
    result: String,
    source_field: &'a str,
    result_field: &'a str,
    expected_delta: f64,
    matches_expected: bool,
    #[serde(flatten)]
    check: ConservationCheck,
}

pub fn cmd_verify(args: VerifyArgs) -> Result<(), CliError> {
    let source_name = args.source.display().to_string();
    let result_name = args.result.display().to_string();

    let layer = parse_geojson_layer(&source_name, &read_file(&args.source)?, None)?;
    let table = parse_result_table(&result_name, &read_file(&args.result)?, args.id_column.as_deref())?;

    let options = VerifyOptions {
        tolerance: Tolerance::default(),
        missing: if args.missing_as_zero { MissingValuePolicy::Zero } else { MissingValuePolicy::Reject },
    };
    let check = verify(&layer, &args.source_field, &table, &args.result_field, &options)?;
    let matches_expected = check.matches(args.expected_delta, &options.tolerance);

    if args.json {
        let report = VerifyReport {
            source: source_name,
            result: result_name,
            source_field: &args.source_field,
            result_field: &args.result_field,
            expected_delta: args.expected_delta,
            matches_expected,
            check,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::new(EXIT_IO, format!("JSON serialization error: {e}")))?;
        println!("{json}");
    }

    eprintln!(
        "{} -> {}: source {}, reallocated {}, delta {} (expected {})",
        args.source_field,
        args.result_field,
        check.source_total,
        check.reallocated_total,
        check.delta,
        args.expected_delta
    );

    if !matches_expected {
        return Err(CliError::new(
            EXIT_CONSERVATION,
            format!(
                "conservation delta {} does not match expected {}",
                check.delta, args.expected_delta
            ),
        )
        .with_hint("pass --expected-delta with the known residual if the loss is legitimate"));
    }
    Ok(())
}
