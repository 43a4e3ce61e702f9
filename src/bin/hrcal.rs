//! hrcal - calibrate wearable heart rate against a reference device
//!
//! Commands:
//! - calibrate: Build minute pairs from CSV exports, fit contextual models and
//!   write the calibrated dataset and a model summary
//! - config: Print the default configuration as JSON

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hr_calibrate::config::{BinSize, CalibrationConfig, ModelKind};
use hr_calibrate::report::ReportEncoder;
use hr_calibrate::timeutil::local_to_utc;
use hr_calibrate::types::{ContextInterval, IntervalKind, RawInterval, Sample, ScanRecord};
use hr_calibrate::{calibrate, CalibrationError, CalibrationInputs, CALIB_VERSION};

/// hrcal - contextual heart-rate calibration
#[derive(Parser)]
#[command(name = "hrcal")]
#[command(version = CALIB_VERSION)]
#[command(about = "Calibrate wearable heart rate against a reference device", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit contextual calibration models and apply them
    Calibrate {
        /// Scan CSV (start,duration,value with list cells)
        #[arg(long)]
        scan_csv: PathBuf,

        /// Reference CSV (time,heartRate[,userId]) with naive local times
        #[arg(long)]
        reference_csv: PathBuf,

        /// Sleep CSV (startTime,endTime[,status][,userId])
        #[arg(long)]
        sleep_csv: Option<PathBuf>,

        /// Sport CSV (time,duration[,sportType][,userId])
        #[arg(long)]
        sport_csv: Option<PathBuf>,

        /// Keep only reference, sleep and sport rows of this user
        #[arg(long)]
        user_id: Option<i64>,

        /// Bin size, e.g. "1min", "30s", "5T"
        #[arg(long)]
        freq: Option<String>,

        /// Model family
        #[arg(long)]
        model: Option<ModelArg>,

        /// Minimum scan seconds per bin
        #[arg(long)]
        min_scan_coverage: Option<f64>,

        /// IANA timezone of naive timestamps (e.g. "Europe/Rome")
        #[arg(long)]
        timezone: Option<String>,

        /// JSON configuration file; flags override its values
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the calibrated dataset as CSV
        #[arg(long)]
        out_pairs: Option<PathBuf>,

        /// Write the model summary as JSON (stdout if omitted)
        #[arg(long)]
        out_models: Option<PathBuf>,
    },

    /// Print the default configuration as JSON
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    /// Binned medians with monotone cubic interpolation
    Pchip,
    /// Pool-adjacent-violators step fit
    Isotonic,
}

impl From<ModelArg> for ModelKind {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Pchip => ModelKind::Pchip,
            ModelArg::Isotonic => ModelKind::Isotonic,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), HrcalCliError> {
    match cli.command {
        Commands::Calibrate {
            scan_csv,
            reference_csv,
            sleep_csv,
            sport_csv,
            user_id,
            freq,
            model,
            min_scan_coverage,
            timezone,
            config,
            out_pairs,
            out_models,
        } => {
            let mut config = match config {
                Some(path) => CalibrationConfig::from_json(&fs::read_to_string(path)?)?,
                None => CalibrationConfig::default(),
            };
            if let Some(freq) = freq {
                config.bin_size = freq.parse::<BinSize>()?;
            }
            if let Some(model) = model {
                config.model_kind = model.into();
            }
            if let Some(min) = min_scan_coverage {
                config.min_scan_coverage_s = min;
            }
            if let Some(tz) = timezone {
                config.timezone = tz;
            }
            config.validate()?;

            let sources = Sources {
                scan: &scan_csv,
                reference: &reference_csv,
                sleep: sleep_csv.as_deref(),
                sport: sport_csv.as_deref(),
                user_id,
            };
            cmd_calibrate(&sources, &config, out_pairs.as_deref(), out_models.as_deref())
        }

        Commands::Config => {
            println!("{}", CalibrationConfig::default().to_json()?);
            Ok(())
        }
    }
}

struct Sources<'a> {
    scan: &'a Path,
    reference: &'a Path,
    sleep: Option<&'a Path>,
    sport: Option<&'a Path>,
    user_id: Option<i64>,
}

fn cmd_calibrate(
    sources: &Sources<'_>,
    config: &CalibrationConfig,
    out_pairs: Option<&Path>,
    out_models: Option<&Path>,
) -> Result<(), HrcalCliError> {
    let tz = config.tz()?;

    let mut context_intervals = Vec::new();
    if let Some(path) = sources.sleep {
        context_intervals.extend(read_sleep(path, &tz, sources.user_id)?);
    }
    if let Some(path) = sources.sport {
        context_intervals.extend(read_sport(path, &tz, sources.user_id)?);
    }

    let inputs = CalibrationInputs {
        scan: read_scan(sources.scan)?,
        reference: read_reference(sources.reference, &tz, sources.user_id)?,
        context_intervals,
    };
    info!(
        scan_intervals = inputs.scan.len(),
        reference_readings = inputs.reference.len(),
        context_intervals = inputs.context_intervals.len(),
        "loaded inputs"
    );

    let run = calibrate(&inputs, config)?;
    let encoder = ReportEncoder::new();

    if let Some(path) = out_pairs {
        let mut writer = csv::Writer::from_path(path)?;
        for row in encoder.dataset_rows(&run, config)? {
            writer.serialize(row)?;
        }
        writer.flush()?;
        debug!(path = %path.display(), rows = run.pairs.len(), "wrote calibrated dataset");
    }

    let summary = encoder.summarize(&run, config).to_json()?;
    match out_models {
        Some(path) => fs::write(path, summary)?,
        None => println!("{summary}"),
    }

    Ok(())
}

// Input rows

#[derive(Debug, Deserialize)]
struct ScanRow {
    start: String,
    #[serde(default)]
    duration: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferenceRow {
    time: String,
    heart_rate: Option<f64>,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SleepRow {
    start_time: String,
    end_time: String,
    /// 0 is awake; any other stage counts as sleep
    #[serde(default)]
    status: Option<i64>,
    #[serde(default)]
    user_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SportRow {
    time: String,
    /// Seconds
    duration: f64,
    #[serde(default)]
    sport_type: Option<String>,
    #[serde(default)]
    user_id: Option<i64>,
}

impl SleepRow {
    fn is_asleep(&self) -> bool {
        self.status != Some(0)
    }
}

fn keep_user(row_user: Option<i64>, wanted: Option<i64>) -> bool {
    match wanted {
        Some(wanted) => row_user == Some(wanted),
        None => true,
    }
}

fn read_rows<T>(path: &Path) -> Result<Vec<(usize, T)>, HrcalCliError>
where
    T: for<'de> Deserialize<'de>,
{
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    reader
        .deserialize::<T>()
        .enumerate()
        // Header is line 1
        .map(|(i, row)| row.map(|row| (i + 2, row)).map_err(HrcalCliError::from))
        .collect()
}

fn at_line(path: &Path, line: usize) -> impl Fn(CalibrationError) -> HrcalCliError + '_ {
    move |source| HrcalCliError::Input {
        file: path.display().to_string(),
        line,
        source,
    }
}

/// Parse a list cell such as `[60, 30]`; an empty cell is an empty list
fn parse_list_cell(cell: &str) -> Result<Vec<f64>, CalibrationError> {
    let cell = cell.trim();
    if cell.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(cell)
        .map_err(|e| CalibrationError::MalformedInterval(format!("bad list cell '{cell}': {e}")))
}

impl ScanRow {
    fn intervals(&self) -> Result<Vec<RawInterval>, CalibrationError> {
        let durations = parse_list_cell(&self.duration)?
            .into_iter()
            .map(whole_seconds)
            .collect::<Result<Vec<_>, _>>()?;
        let values = parse_list_cell(&self.value)?;
        ScanRecord::from_export(&self.start, durations, values)?.intervals()
    }
}

fn read_scan(path: &Path) -> Result<Vec<RawInterval>, HrcalCliError> {
    let mut intervals = Vec::new();
    for (line, row) in read_rows::<ScanRow>(path)? {
        intervals.extend(row.intervals().map_err(at_line(path, line))?);
    }
    Ok(intervals)
}

fn whole_seconds(duration: f64) -> Result<i64, CalibrationError> {
    if duration.is_finite() && duration.fract() == 0.0 {
        Ok(duration as i64)
    } else {
        Err(CalibrationError::MalformedInterval(format!(
            "duration {duration} is not a whole number of seconds"
        )))
    }
}

fn read_reference(
    path: &Path,
    tz: &chrono_tz::Tz,
    user_id: Option<i64>,
) -> Result<Vec<Sample>, HrcalCliError> {
    let mut samples = Vec::new();
    for (line, row) in read_rows::<ReferenceRow>(path)? {
        if !keep_user(row.user_id, user_id) {
            continue;
        }
        let Some(value) = row.heart_rate else {
            continue;
        };
        let timestamp = local_to_utc(&row.time, tz).map_err(at_line(path, line))?;
        samples.push(Sample::new(timestamp, value));
    }
    Ok(samples)
}

fn read_sleep(
    path: &Path,
    tz: &chrono_tz::Tz,
    user_id: Option<i64>,
) -> Result<Vec<ContextInterval>, HrcalCliError> {
    let mut intervals = Vec::new();
    for (line, row) in read_rows::<SleepRow>(path)? {
        if !keep_user(row.user_id, user_id) || !row.is_asleep() {
            continue;
        }
        let err = at_line(path, line);
        let start = local_to_utc(&row.start_time, tz).map_err(&err)?;
        let end = local_to_utc(&row.end_time, tz).map_err(&err)?;
        intervals.push(ContextInterval::new(start, end, IntervalKind::Sleep));
    }
    Ok(intervals)
}

fn read_sport(
    path: &Path,
    tz: &chrono_tz::Tz,
    user_id: Option<i64>,
) -> Result<Vec<ContextInterval>, HrcalCliError> {
    let mut intervals = Vec::new();
    for (line, row) in read_rows::<SportRow>(path)? {
        if !keep_user(row.user_id, user_id) {
            continue;
        }
        let err = at_line(path, line);
        let start = local_to_utc(&row.time, tz).map_err(&err)?;
        let seconds = whole_seconds(row.duration.round()).map_err(&err)?;
        let end = chrono::Duration::try_seconds(seconds)
            .and_then(|d| start.checked_add_signed(d))
            .ok_or_else(|| {
                err(CalibrationError::MalformedInterval(format!(
                    "sport duration {seconds}s is out of range"
                )))
            })?;
        debug!(sport = row.sport_type.as_deref().unwrap_or("unknown"), seconds, "sport session");
        intervals.push(ContextInterval::new(start, end, IntervalKind::Sport));
    }
    Ok(intervals)
}

// Error types

#[derive(Debug)]
enum HrcalCliError {
    Io(io::Error),
    Csv(csv::Error),
    Json(serde_json::Error),
    Calibration(CalibrationError),
    Input {
        file: String,
        line: usize,
        source: CalibrationError,
    },
}

impl From<io::Error> for HrcalCliError {
    fn from(e: io::Error) -> Self {
        HrcalCliError::Io(e)
    }
}

impl From<csv::Error> for HrcalCliError {
    fn from(e: csv::Error) -> Self {
        HrcalCliError::Csv(e)
    }
}

impl From<serde_json::Error> for HrcalCliError {
    fn from(e: serde_json::Error) -> Self {
        HrcalCliError::Json(e)
    }
}

impl From<CalibrationError> for HrcalCliError {
    fn from(e: CalibrationError) -> Self {
        HrcalCliError::Calibration(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<HrcalCliError> for CliError {
    fn from(e: HrcalCliError) -> Self {
        match e {
            HrcalCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            HrcalCliError::Csv(e) => CliError {
                code: "CSV_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the CSV header and column types".to_string()),
            },
            HrcalCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            HrcalCliError::Input { file, line, source } => CliError {
                code: "INPUT_ERROR".to_string(),
                message: format!("{file}:{line}: {source}"),
                hint: Some(
                    "Scan timestamps need an offset; other timestamps are local time".to_string(),
                ),
            },
            HrcalCliError::Calibration(e) => {
                let (code, hint) = match &e {
                    CalibrationError::InsufficientData { .. } => (
                        "INSUFFICIENT_DATA",
                        "Check that the scan and reference recordings overlap in time",
                    ),
                    CalibrationError::InvalidBinSize(_) => {
                        ("INVALID_BIN_SIZE", "Use a size such as 30s, 1min or 5T")
                    }
                    CalibrationError::InvalidTimezone(_) => {
                        ("INVALID_TIMEZONE", "Use an IANA name such as Europe/Rome")
                    }
                    CalibrationError::InvalidConfig(_) | CalibrationError::Json(_) => {
                        ("INVALID_CONFIG", "Run 'hrcal config' to see a valid configuration")
                    }
                    CalibrationError::MalformedInterval(_) | CalibrationError::DateParse(_) => {
                        ("INPUT_ERROR", "Check the input files")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scan_row(start: &str, duration: &str, value: &str) -> ScanRow {
        ScanRow {
            start: start.to_string(),
            duration: duration.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_keep_user() {
        assert!(keep_user(Some(7), None));
        assert!(keep_user(None, None));
        assert!(keep_user(Some(7), Some(7)));
        assert!(!keep_user(Some(8), Some(7)));
        assert!(!keep_user(None, Some(7)));
    }

    #[test]
    fn test_awake_sleep_rows_are_skipped() {
        let row = |status| SleepRow {
            start_time: "2024-01-01 23:00:00".to_string(),
            end_time: "2024-01-02 07:00:00".to_string(),
            status,
            user_id: None,
        };
        assert!(!row(Some(0)).is_asleep());
        assert!(row(Some(2)).is_asleep());
        assert!(row(None).is_asleep());
    }

    #[test]
    fn test_parse_list_cell() {
        assert_eq!(parse_list_cell("[60, 30]").unwrap(), vec![60.0, 30.0]);
        assert_eq!(parse_list_cell("[71.5]").unwrap(), vec![71.5]);
        assert!(parse_list_cell("").unwrap().is_empty());
        assert!(parse_list_cell("[]").unwrap().is_empty());
        assert!(matches!(
            parse_list_cell("[60, oops]"),
            Err(CalibrationError::MalformedInterval(_))
        ));
    }

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(60.0).unwrap(), 60);
        assert!(whole_seconds(60.5).is_err());
        assert!(whole_seconds(f64::NAN).is_err());
    }

    #[test]
    fn test_scan_row_to_intervals() {
        let intervals = scan_row("2024-01-01T00:00:00+00:00", "[60, 30]", "[70, 72]")
            .intervals()
            .unwrap();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[1].duration, 30);
        assert_eq!(intervals[1].value, 72.0);
        assert_eq!(intervals[1].start - intervals[0].start, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_bad_scan_rows_are_malformed() {
        for row in [
            scan_row("yesterday", "[60]", "[70]"),
            scan_row("2024-01-01T00:00:00Z", "[60, 30]", "[70]"),
            scan_row("2024-01-01T00:00:00Z", "[10000000000000]", "[70]"),
        ] {
            assert!(matches!(
                row.intervals(),
                Err(CalibrationError::MalformedInterval(_))
            ));
        }
    }
}
