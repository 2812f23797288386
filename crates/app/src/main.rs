use std::fmt;

use progress_core::model::{LessonIndex, ProgressPercent, ProgressUpdate};
use server::config::Config;
use server::state::AppState;
use services::ProgressClient;
use storage::Storage;
use tracing::info;

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidPort { raw: String },
    InvalidDbUrl { raw: String },
    InvalidLesson { raw: String },
    InvalidPercent { raw: String },
    InvalidCount { flag: &'static str, raw: String },
    ConflictingPercent,
    MissingToken,
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidPort { raw } => write!(f, "invalid --port value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidLesson { raw } => write!(f, "invalid --lesson value: {raw}"),
            ArgsError::InvalidPercent { raw } => {
                write!(f, "invalid --percent value (expected 0-100): {raw}")
            }
            ArgsError::InvalidCount { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::ConflictingPercent => {
                write!(f, "use either --percent or --completed with --total, not both")
            }
            ArgsError::MissingToken => write!(f, "send requires --token or PROGRESS_ID_TOKEN"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- serve [--db <sqlite_url>] [--port <port>] [--dev]");
    eprintln!(
        "  cargo run -p app -- send  --token <id_token> [--attestation <token>] [--lesson <n>]"
    );
    eprintln!("                            [--percent <0-100> | --completed <n> --total <n>]");
    eprintln!();
    eprintln!("Defaults for serve:");
    eprintln!("  --db sqlite://progress.sqlite3");
    eprintln!("  --port 5001");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_DB_URL, PROGRESS_PORT, PROGRESS_REQUIRE_ATTESTATION,");
    eprintln!("  PROGRESS_MIN_INTERVAL_SECS, PROGRESS_IDENTITY_URL, PROGRESS_ATTESTATION_URL,");
    eprintln!("  PROGRESS_DEV_TOKENS, PROGRESS_DEV_ATTESTATION_TOKENS,");
    eprintln!("  PROGRESS_BASE_URL, PROGRESS_PROJECT_ID, PROGRESS_EMULATOR, PROGRESS_ID_TOKEN");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Serve,
    Send,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "serve" => Some(Self::Serve),
            "send" => Some(Self::Send),
            _ => None,
        }
    }
}

/// Flags for `serve`, layered over the environment configuration.
fn parse_serve(
    args: &mut impl Iterator<Item = String>,
    mut config: Config,
) -> Result<Config, ArgsError> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--db" => {
                let value = require_value(args, "--db")?;
                if value.trim().is_empty() {
                    return Err(ArgsError::InvalidDbUrl { raw: value });
                }
                config.db_url = normalize_sqlite_url(value);
            }
            "--port" => {
                let value = require_value(args, "--port")?;
                config.port = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidPort { raw: value.clone() })?;
            }
            "--dev" => config = config.into_development(),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(ArgsError::UnknownArg(arg)),
        }
    }
    config.db_url = normalize_sqlite_url(config.db_url);
    Ok(config)
}

struct SendArgs {
    token: String,
    attestation: Option<String>,
    update: ProgressUpdate,
}

fn parse_send(args: &mut impl Iterator<Item = String>) -> Result<SendArgs, ArgsError> {
    let mut token = std::env::var("PROGRESS_ID_TOKEN").ok();
    let mut attestation = None;
    let mut update = ProgressUpdate::new();
    let (mut completed, mut total) = (None, None);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--token" => token = Some(require_value(args, "--token")?),
            "--attestation" => attestation = Some(require_value(args, "--attestation")?),
            "--lesson" => {
                let value = require_value(args, "--lesson")?;
                let lesson: LessonIndex = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidLesson { raw: value.clone() })?;
                update = update.with_last_completed_lesson(lesson);
            }
            "--percent" => {
                let value = require_value(args, "--percent")?;
                let percent = value
                    .parse::<i64>()
                    .ok()
                    .and_then(|p| ProgressPercent::new(p).ok())
                    .ok_or_else(|| ArgsError::InvalidPercent { raw: value.clone() })?;
                update = update.with_progress_percent(percent);
            }
            "--completed" => completed = Some(parse_count(args, "--completed")?),
            "--total" => total = Some(parse_count(args, "--total")?),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            _ => return Err(ArgsError::UnknownArg(arg)),
        }
    }

    match (completed, total) {
        (None, None) => {}
        (Some(completed), Some(total)) => {
            if update.progress_percent.is_some() {
                return Err(ArgsError::ConflictingPercent);
            }
            update =
                update.with_progress_percent(ProgressPercent::from_completion(completed, total));
        }
        (Some(_), None) => return Err(ArgsError::MissingValue { flag: "--total" }),
        (None, Some(_)) => return Err(ArgsError::MissingValue { flag: "--completed" }),
    }

    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or(ArgsError::MissingToken)?;
    Ok(SendArgs {
        token,
        attestation,
        update,
    })
}

fn parse_count(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<usize, ArgsError> {
    let value = require_value(args, flag)?;
    value
        .parse()
        .map_err(|_| ArgsError::InvalidCount { flag, raw: value.clone() })
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv: Vec<String> = std::env::args().skip(1).collect();

    // No subcommand means serve.
    let cmd = match argv.first().map(String::as_str) {
        None => Command::Serve,
        Some("--help" | "-h") => {
            print_usage();
            return Ok(());
        }
        Some(first) if first.starts_with("--") => Command::Serve,
        Some(first) => Command::from_arg(first).ok_or_else(|| {
            eprintln!("unknown subcommand: {first}");
            print_usage();
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "unknown subcommand")
        })?,
    };

    if !argv.is_empty() && !argv[0].starts_with("--") {
        argv.remove(0);
    }
    let mut iter = argv.into_iter();

    match cmd {
        Command::Serve => {
            server::init_tracing();
            let config = parse_serve(&mut iter, Config::from_env()?).map_err(|e| {
                eprintln!("{e}");
                print_usage();
                e
            })?;

            // Open + migrate SQLite at startup; the store lives as long as the server.
            prepare_sqlite_file(&config.db_url)?;
            let storage = Storage::sqlite(&config.db_url).await?;
            info!(db = %config.db_url, "storage ready");

            let state = AppState::from_config(&config, &storage)?;
            server::serve(&config, state).await?;
            Ok(())
        }
        Command::Send => {
            let args = parse_send(&mut iter).map_err(|e| {
                eprintln!("{e}");
                print_usage();
                e
            })?;
            let client = ProgressClient::from_env();
            let ack = client
                .send_progress(&args.token, args.attestation.as_deref(), &args.update)
                .await?;
            println!("success: {}", ack.success);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // At this layer (binary glue), printing once is fine.
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> impl Iterator<Item = String> {
        raw.iter().map(|s| (*s).to_owned()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn serve_flags_override_config() {
        let config = parse_serve(
            &mut args(&["--db", "sqlite::memory:", "--port", "9000", "--dev"]),
            Config::default(),
        )
        .unwrap();
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.port, 9000);
        assert!(!config.require_attestation);
    }

    #[test]
    fn serve_rejects_bad_port() {
        assert!(matches!(
            parse_serve(&mut args(&["--port", "x"]), Config::default()),
            Err(ArgsError::InvalidPort { .. })
        ));
    }

    #[test]
    fn send_builds_update() {
        let parsed =
            parse_send(&mut args(&["--token", "t", "--lesson", "4", "--percent", "50"])).unwrap();
        assert_eq!(parsed.token, "t");
        assert_eq!(parsed.update.last_completed_lesson, Some(LessonIndex::new(4)));
        assert_eq!(parsed.update.progress_percent.map(ProgressPercent::value), Some(50));
    }

    #[test]
    fn send_rejects_out_of_range_percent() {
        assert!(matches!(
            parse_send(&mut args(&["--token", "t", "--percent", "101"])),
            Err(ArgsError::InvalidPercent { .. })
        ));
    }

    #[test]
    fn send_derives_percent_from_completed_lessons() {
        let parsed = parse_send(&mut args(&[
            "--token",
            "t",
            "--lesson",
            "2",
            "--completed",
            "3",
            "--total",
            "8",
        ]))
        .unwrap();
        assert_eq!(parsed.update.progress_percent.map(ProgressPercent::value), Some(38));
        assert_eq!(parsed.update.last_completed_lesson, Some(LessonIndex::new(2)));
    }

    #[test]
    fn send_rejects_partial_or_conflicting_completion() {
        assert!(matches!(
            parse_send(&mut args(&["--token", "t", "--completed", "3"])),
            Err(ArgsError::MissingValue { flag: "--total" })
        ));
        assert!(matches!(
            parse_send(&mut args(&[
                "--token",
                "t",
                "--percent",
                "10",
                "--completed",
                "1",
                "--total",
                "2"
            ])),
            Err(ArgsError::ConflictingPercent)
        ));
        assert!(matches!(
            parse_send(&mut args(&["--token", "t", "--total", "x"])),
            Err(ArgsError::InvalidCount { flag: "--total", .. })
        ));
    }

    #[test]
    fn relative_sqlite_paths_become_absolute() {
        let url = normalize_sqlite_url("sqlite:data/progress.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/progress.sqlite3"));
    }
}
