use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tierwatch_core::{
    ActivityLookup, CellHighlight, EngineError, RoleEvaluator, RoleKind, RoleMembership,
};
use tierwatch_remote::{ActivityApi, NoRemoteLookup};
use tierwatch_replica_sqlite::{ReplicaConfig, SqliteReplica};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_API_ENDPOINT: &str = "https://www.wikidata.org/w/api.php";

#[derive(Debug, Parser)]
#[command(name = "tierwatch")]
#[command(about = "Role-tier activity report generator")]
struct Cli {
    /// Local wiki replica database.
    #[arg(long, default_value = "./wikidatawiki.sqlite3")]
    local_db: PathBuf,

    /// Central wiki replica database (cross-wiki rights and rename logs).
    #[arg(long, default_value = "./metawiki.sqlite3")]
    central_db: PathBuf,

    #[arg(long, default_value = DEFAULT_API_ENDPOINT)]
    api: String,

    /// Skip the remote activity lookup; last logged actions read as absent.
    #[arg(long, default_value_t = false)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Report(ReportArgs),
    Roles,
}

#[derive(Debug, Args)]
struct ReportArgs {
    /// Roles to evaluate; all roles when omitted.
    #[arg(long = "role", value_enum)]
    roles: Vec<RoleArg>,

    #[arg(long, default_value = "./reports")]
    out_dir: PathBuf,

    #[arg(long, value_enum, default_value = "wikitext")]
    format: FormatArg,

    /// Evaluation time as an RFC3339 UTC timestamp; defaults to now.
    #[arg(long)]
    now: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Wikitext,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Administrator,
    Bureaucrat,
    Oversighter,
    Checkuser,
    InterfaceAdmin,
    TranslationAdmin,
    PropertyCreator,
    Bot,
    Flooder,
    IpblockExempt,
    Rollbacker,
    Confirmed,
}

impl RoleArg {
    fn into_role(self) -> RoleKind {
        match self {
            Self::Administrator => RoleKind::Administrator,
            Self::Bureaucrat => RoleKind::Bureaucrat,
            Self::Oversighter => RoleKind::Oversighter,
            Self::Checkuser => RoleKind::Checkuser,
            Self::InterfaceAdmin => RoleKind::InterfaceAdmin,
            Self::TranslationAdmin => RoleKind::TranslationAdmin,
            Self::PropertyCreator => RoleKind::PropertyCreator,
            Self::Bot => RoleKind::Bot,
            Self::Flooder => RoleKind::Flooder,
            Self::IpblockExempt => RoleKind::IpBlockExempt,
            Self::Rollbacker => RoleKind::Rollbacker,
            Self::Confirmed => RoleKind::ConfirmedUser,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match &cli.command {
        Command::Report(args) => run_report(&cli, args),
        Command::Roles => run_roles(),
    }
}

fn run_report(cli: &Cli, args: &ReportArgs) -> Result<()> {
    let now = parse_optional_rfc3339(args.now.as_deref())?;
    let replica =
        SqliteReplica::new(ReplicaConfig::new(cli.local_db.clone(), cli.central_db.clone()));
    let activity: Box<dyn ActivityLookup> = if cli.offline {
        Box::new(NoRemoteLookup)
    } else {
        Box::new(ActivityApi::new(cli.api.clone()))
    };
    let evaluator = RoleEvaluator::new(&replica, activity.as_ref());

    let roles: Vec<RoleKind> = if args.roles.is_empty() {
        RoleKind::ALL.to_vec()
    } else {
        args.roles.iter().map(|role| role.into_role()).collect()
    };

    fs::create_dir_all(&args.out_dir).with_context(|| {
        format!("failed to create report directory {}", args.out_dir.display())
    })?;

    // Administrator membership is evaluated once and shared: it backs its
    // own report and the bureaucrat/oversighter dependency links.
    let needs_admins = roles
        .iter()
        .any(|role| *role == RoleKind::Administrator || role.requires_admin_link());
    let admins: Option<Result<RoleMembership, EngineError>> = if needs_admins {
        Some(evaluator.evaluate(RoleKind::Administrator, now, None))
    } else {
        None
    };

    let mut reports = Vec::new();
    let mut failures: Vec<(RoleKind, EngineError)> = Vec::new();

    for role in &roles {
        let outcome = match (*role, &admins) {
            (RoleKind::Administrator, Some(Ok(membership))) => Ok(membership.clone()),
            (RoleKind::Administrator, Some(Err(err))) => Err(err.clone()),
            (role, Some(Ok(admin_membership))) if role.requires_admin_link() => {
                evaluator.evaluate(role, now, Some(admin_membership))
            }
            (role, Some(Err(err))) if role.requires_admin_link() => Err(err.clone()),
            (role, _) => evaluator.evaluate(role, now, None),
        };

        match outcome {
            Ok(membership) => {
                let path = write_report(&args.out_dir, &membership, args.format, now)?;
                info!(
                    role = %membership.role,
                    members = membership.len(),
                    path = %path.display(),
                    "report written"
                );
                reports.push(serde_json::json!({
                    "role": role.as_str(),
                    "members": membership.len(),
                    "path": path,
                }));
            }
            Err(err) => {
                error!(role = %role, error = %err, "role evaluation failed; no report emitted");
                failures.push((*role, err));
            }
        }
    }

    emit_json(serde_json::json!({
        "reports": reports,
        "failed_roles": failures
            .iter()
            .map(|(role, err)| serde_json::json!({
                "role": role.as_str(),
                "error": err.to_string(),
            }))
            .collect::<Vec<_>>(),
    }))?;

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} role evaluation(s) failed", failures.len()))
    }
}

fn run_roles() -> Result<()> {
    let roles = RoleKind::ALL
        .iter()
        .map(|role| {
            serde_json::json!({
                "role": role.as_str(),
                "group": role.group(),
                "former_groups": role.former_groups(),
                "window_months": role.window_months(),
                "has_inactivity_policy": role.has_policy(),
                "requires_admin": role.requires_admin_link(),
                "report_page": role.report_page_name(),
            })
        })
        .collect::<Vec<_>>();
    emit_json(serde_json::json!({ "roles": roles }))
}

fn write_report(
    out_dir: &Path,
    membership: &RoleMembership,
    format: FormatArg,
    now: OffsetDateTime,
) -> Result<PathBuf> {
    let generated_at = format_rfc3339(now)?;
    let (body, extension) = match format {
        FormatArg::Wikitext => (render_wikitext(membership, &generated_at), "txt"),
        FormatArg::Json => {
            let payload = with_contract_version(serde_json::json!({
                "role": membership.role.as_str(),
                "generated_at": generated_at,
                "column_headers": membership.role.column_headers(),
                "membership": serde_json::to_value(membership)
                    .context("failed to serialize membership")?,
                "rows": serde_json::to_value(membership.report_rows())
                    .context("failed to serialize report rows")?,
            }));
            let mut body = serde_json::to_string_pretty(&payload)?;
            body.push('\n');
            (body, "json")
        }
    };

    let filename =
        format!("{}.{extension}", sanitize_page_name(membership.role.report_page_name()));
    let path = out_dir.join(filename);
    fs::write(&path, body)
        .with_context(|| format!("failed to write report file {}", path.display()))?;
    Ok(path)
}

fn render_wikitext(membership: &RoleMembership, generated_at: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("Last update: {generated_at}\n\n"));
    out.push_str("{| class=\"wikitable sortable tierwatch-activity\"\n|-\n");
    out.push_str(&format!("! {}\n", membership.role.column_headers().join(" !! ")));

    for row in membership.report_rows() {
        out.push_str("|-\n");
        for (index, cell) in row.cells.iter().enumerate() {
            if index == 0 {
                out.push_str(&format!("| {{{{User|{}}}}}\n", row.username));
            } else {
                out.push_str(&format!(
                    "|{} data-sort-value=\"{}\" | {}\n",
                    highlight_attribute(cell.highlight),
                    cell.sort_value,
                    cell.text
                ));
            }
        }
    }

    out.push_str("|}\n");
    out
}

fn highlight_attribute(highlight: CellHighlight) -> &'static str {
    match highlight {
        CellHighlight::None => "",
        CellHighlight::Inactive => " class=\"inactive\"",
        CellHighlight::Slipping => " class=\"slipping\"",
        CellHighlight::FreshlyPromoted => " class=\"freshly_promoted\"",
        CellHighlight::NotAdmin => " class=\"not_admin\"",
    }
}

fn sanitize_page_name(name: &str) -> String {
    name.replace(['/', ' ', ':'], "_")
}

fn format_rfc3339(value: OffsetDateTime) -> Result<String> {
    value.format(&Rfc3339).context("failed to format timestamp")
}

fn parse_optional_rfc3339(value: Option<&str>) -> Result<OffsetDateTime> {
    match value {
        Some(raw) => parse_rfc3339(raw),
        None => Ok(OffsetDateTime::now_utc()),
    }
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339)
        .with_context(|| format!("invalid RFC3339 UTC timestamp: {value}"))?;

    if parsed.offset() != time::UtcOffset::UTC {
        return Err(anyhow!("timestamp MUST use UTC offset Z (received: {value})"));
    }

    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_page_name_replaces_path_hostile_characters() {
        assert_eq!(sanitize_page_name("IP block exempted user"), "IP_block_exempted_user");
        assert_eq!(sanitize_page_name("A/B:C"), "A_B_C");
    }

    #[test]
    fn parse_rfc3339_rejects_non_utc_offsets() {
        assert!(parse_rfc3339("2024-05-15T12:00:00Z").is_ok());
        assert!(parse_rfc3339("2024-05-15T12:00:00+02:00").is_err());
        assert!(parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn contract_version_is_attached_to_objects() {
        let value = with_contract_version(serde_json::json!({ "reports": [] }));
        assert_eq!(value["contract_version"], CLI_CONTRACT_VERSION);
    }
}
