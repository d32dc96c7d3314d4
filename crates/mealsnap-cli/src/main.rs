use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use mealsnap_contracts::config::PipelineConfig;
use mealsnap_contracts::events::EventWriter;
use mealsnap_contracts::images::{ImageFormat, RawImage};
use mealsnap_contracts::meals::MealType;
use mealsnap_contracts::records::{JsonRecordStore, MealRecord};
use mealsnap_contracts::sink::{DerivativeSink, DirectorySink};
use mealsnap_engine::admission::allowed_meal_types;
use mealsnap_engine::{
    AdmissionRequest, EngineError, IntakeEngine, RawAnalysisResponse, ValidationContext,
};
use serde_json::{json, Value};

const EXIT_OK: i32 = 0;
const EXIT_REJECTED: i32 = 2;

#[derive(Debug, Parser)]
#[command(name = "mealsnap", version, about = "Meal photo intake pipeline")]
struct Cli {
    /// JSON overrides merged over the built-in defaults (falls back to $MEALSNAP_CONFIG).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Append pipeline events to this JSON-lines file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate an upload and produce its analysis, thumbnail and archive derivatives.
    Derive(DeriveArgs),
    /// Correct a raw analysis response.
    Validate(ValidateArgs),
    /// Decide whether a user may upload a meal now.
    Admit(AdmitArgs),
    /// Show the configured time windows and what is open at a given time.
    Slots(SlotsArgs),
}

#[derive(Debug, Parser)]
struct DeriveArgs {
    #[arg(long)]
    image: PathBuf,
    /// Declared MIME type; guessed from the extension when omitted.
    #[arg(long)]
    mime: Option<String>,
    /// Write the derivatives under `<out>/<content hash>/`.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Include the base64 analysis payload in the report.
    #[arg(long)]
    payload: bool,
}

#[derive(Debug, Parser)]
struct ValidateArgs {
    /// Response JSON file, or `-` for stdin.
    #[arg(long)]
    response: PathBuf,
    #[arg(long, default_value_t = 0)]
    retries: u32,
    #[arg(long)]
    fallback: bool,
}

#[derive(Debug, Parser)]
struct AdmitArgs {
    #[arg(long)]
    user: String,
    #[arg(long)]
    meal_type: MealType,
    /// RFC 3339 timestamp; defaults to now.
    #[arg(long)]
    at: Option<String>,
    #[arg(long)]
    records: PathBuf,
    /// Append a record for the meal when admitted.
    #[arg(long)]
    record: bool,
    /// Content hash stored with the appended record.
    #[arg(long)]
    hash: Option<String>,
}

#[derive(Debug, Parser)]
struct SlotsArgs {
    #[arg(long)]
    at: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mealsnap error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(cli.config.as_deref())?;
    let mut engine = IntakeEngine::new(config)?;
    if let Some(path) = &cli.events {
        engine = engine.with_events(EventWriter::new(path, new_session_id()));
    }
    match cli.command {
        Command::Derive(args) => run_derive(&engine, args),
        Command::Validate(args) => run_validate(&engine, args),
        Command::Admit(args) => run_admit(&engine, args),
        Command::Slots(args) => run_slots(&engine, args),
    }
}

fn run_derive(engine: &IntakeEngine, args: DeriveArgs) -> Result<i32> {
    let bytes =
        fs::read(&args.image).with_context(|| format!("failed reading {}", args.image.display()))?;
    let mime = args.mime.or_else(|| guess_image_mime(&args.image).map(str::to_string));
    let report = match engine.derive(&RawImage::new(bytes, mime)) {
        Ok(report) => report,
        Err(err) => {
            print_json(&engine_error_json(&err))?;
            return Ok(EXIT_REJECTED);
        }
    };

    let mut output = report.to_json();
    if let Some(out) = &args.out {
        let written = DirectorySink::new(out).store(&report.hash, &report.images)?;
        output["written"] = json!(written
            .iter()
            .map(|path| path.to_string_lossy().to_string())
            .collect::<Vec<_>>());
    }
    if args.payload {
        if let Some(payload) = report.images.analysis_payload() {
            output["analysis_payload"] = json!({
                "mime_type": payload.mime_type,
                "data": payload.data,
            });
        }
    }
    output["ok"] = json!(true);
    print_json(&output)?;
    Ok(EXIT_OK)
}

fn run_validate(engine: &IntakeEngine, args: ValidateArgs) -> Result<i32> {
    let raw = read_response(&args.response)?;
    let outcome = engine.validate_analysis(
        &RawAnalysisResponse::parse(&raw),
        ValidationContext {
            retry_count: args.retries,
            is_fallback: args.fallback,
        },
    );
    print_json(&serde_json::to_value(&outcome)?)?;
    Ok(if outcome.is_valid {
        EXIT_OK
    } else {
        EXIT_REJECTED
    })
}

fn run_admit(engine: &IntakeEngine, args: AdmitArgs) -> Result<i32> {
    let offset = engine.config().admission.offset();
    let at = parse_at(args.at.as_deref(), offset)?;
    let store = JsonRecordStore::new(&args.records);
    let request = AdmissionRequest::new(args.user.clone(), args.meal_type, at);
    let decision = engine.admit(&store, &request);

    let mut output = serde_json::to_value(&decision)?;
    if decision.allowed && args.record {
        let mut record = MealRecord::new(args.user, args.meal_type, at.with_timezone(&offset));
        if let Some(hash) = args.hash {
            record = record.with_content_hash(hash);
        }
        output["recorded"] = json!(record.id);
        store.append(record)?;
    }
    print_json(&output)?;
    Ok(if decision.allowed {
        EXIT_OK
    } else {
        EXIT_REJECTED
    })
}

fn run_slots(engine: &IntakeEngine, args: SlotsArgs) -> Result<i32> {
    let admission = &engine.config().admission;
    let at = parse_at(args.at.as_deref(), admission.offset())?;
    let windows = MealType::ALL
        .into_iter()
        .map(|meal_type| {
            let window = admission
                .slots
                .window(meal_type)
                .map(|window| json!(window.to_string()))
                .unwrap_or(Value::Null);
            (meal_type.as_str().to_string(), window)
        })
        .collect::<serde_json::Map<_, _>>();
    print_json(&json!({
        "at": at.with_timezone(&admission.offset()).to_rfc3339(),
        "utc_offset_minutes": admission.utc_offset_minutes,
        "windows": windows,
        "allowed_meal_types": allowed_meal_types(admission, at),
    }))?;
    Ok(EXIT_OK)
}

fn parse_at(raw: Option<&str>, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(Utc::now().with_timezone(&offset));
    };
    DateTime::parse_from_rfc3339(raw).with_context(|| format!("invalid --at timestamp '{raw}'"))
}

fn read_response(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed reading response from stdin")?;
        return Ok(raw);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        bail!("{} is empty", path.display());
    }
    Ok(raw)
}

fn engine_error_json(err: &EngineError) -> Value {
    let mut output = json!({
        "ok": false,
        "code": err.code(),
        "error": err.to_string(),
    });
    if let EngineError::FileTooLarge { size, limit } = err {
        output["size"] = json!(size);
        output["limit"] = json!(limit);
    }
    output
}

fn guess_image_mime(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let format = match ext.as_str() {
        "jpg" | "jpeg" => ImageFormat::Jpeg,
        "png" => ImageFormat::Png,
        "webp" => ImageFormat::Webp,
        "gif" => ImageFormat::Gif,
        "heic" | "heif" => ImageFormat::Heic,
        _ => return None,
    };
    Some(format.mime_type())
}

fn new_session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("mealsnap-{}", &id[..12])
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
