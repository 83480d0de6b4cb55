//! Medlink CLI — drives the portal session layer and room provisioning.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use medlink_api::{GatewayClient, ProvisionRequest, RoomProvisioner, auth_headers};
use medlink_config::{CliOverrides, MedlinkConfig};
use medlink_session::{
    AccessGuard, CredentialStore, FileStore, GuardDecision, MemoryStore, RestoreOutcome,
    SessionRestorer, WriteOrigin, device_id,
};
use medlink_types::{RoomOrigin, SessionRecord};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "medlink", version, about = "Telemedicine portal session and room orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Gateway base URL (overrides MEDLINK_GATEWAY_URL)
    #[arg(long, global = true)]
    gateway_url: Option<String>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Store a session from a JSON session record, as a successful login would
    Login {
        /// Path to the session record JSON
        #[arg(long)]
        record: PathBuf,
    },
    /// Remove the session from both stores
    Logout,
    /// Restore the session and show its state
    Status {
        /// Location the portal is showing at startup
        #[arg(long, default_value = "/")]
        at: String,
    },
    /// Navigate into a protected location
    Open { path: String },
    /// Print the headers an authenticated API call would carry
    Headers,
    /// Provision the video room of an encounter
    Provision {
        /// Encounter (attendance) number
        encounter: u64,
        /// Patient identifier (defaults to the session's current patient)
        #[arg(long)]
        patient: Option<String>,
        /// Clinician identifier (defaults to the scheduled clinician, then config)
        #[arg(long)]
        clinician: Option<String>,
    },
}

/// The session layer of one process: a fresh primary store over the durable file.
struct Portal {
    config: MedlinkConfig,
    durable: Arc<FileStore>,
    credentials: CredentialStore,
    restorer: SessionRestorer,
}

impl Portal {
    fn open(config: MedlinkConfig) -> Result<Self> {
        let durable = Arc::new(
            FileStore::open(config.storage_path())
                .with_context(|| format!("Failed to open {}", config.storage_path().display()))?,
        );
        let credentials = CredentialStore::new(Arc::new(MemoryStore::new()), durable.clone())
            .with_ttl(chrono::Duration::days(config.session_ttl_days));
        let restorer = SessionRestorer::new(credentials.clone(), config.routes.clone());
        Ok(Self {
            config,
            durable,
            credentials,
            restorer,
        })
    }

    /// Boot-time restoration; later calls are no-ops.
    fn boot(&self, at: &str) -> RestoreOutcome {
        self.restorer.restore(at)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    let config = MedlinkConfig::load(CliOverrides {
        gateway_url: cli.gateway_url,
        clinician_id: match &cli.command {
            Command::Provision { clinician, .. } => clinician.clone(),
            _ => None,
        },
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;
    let portal = Portal::open(config)?;

    match cli.command {
        Command::Login { record } => login(&portal, &record),
        Command::Logout => {
            portal.credentials.clear();
            println!("Signed out.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { at } => status(&portal, &at),
        Command::Open { path } => open(&portal, &path),
        Command::Headers => headers(&portal),
        Command::Provision {
            encounter,
            patient,
            clinician,
        } => provision(&portal, encounter, patient, clinician).await,
    }
}

fn login(portal: &Portal, path: &Path) -> Result<ExitCode> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let record: SessionRecord =
        serde_json::from_str(&data).context("Session record is not valid JSON")?;
    if !record.is_complete() {
        bail!("Session record needs a non-empty token and subject code");
    }

    if !portal.credentials.write(&record, WriteOrigin::Login) {
        bail!("Failed to store the session");
    }
    match portal.credentials.expires_at() {
        Some(expiry) => println!(
            "Signed in as {} ({}); backup valid until {}",
            record.subject.name,
            record.subject.code,
            expiry.to_rfc3339()
        ),
        None => println!("Signed in as {}", record.subject.name),
    }
    Ok(ExitCode::SUCCESS)
}

fn status(portal: &Portal, at: &str) -> Result<ExitCode> {
    match portal.boot(at) {
        RestoreOutcome::Restored {
            redirect: Some(redirect),
        } => println!("Session restored; redirecting to {}", redirect.location()),
        RestoreOutcome::Restored { redirect: None } => println!("Session restored."),
        RestoreOutcome::Active => println!("Session active."),
        RestoreOutcome::NoSession | RestoreOutcome::AlreadyRan => {}
    }

    let Some(record) = portal.credentials.read() else {
        println!("Not signed in.");
        return Ok(ExitCode::from(1));
    };
    println!("Subject:  {} ({})", record.subject.name, record.subject.code);
    println!("Patient:  {} ({})", record.patient.name, record.patient.code);
    for entry in &record.schedule {
        println!(
            "Pending:  encounter {}{}",
            entry.encounter_id,
            entry
                .specialty
                .as_deref()
                .map(|s| format!(" ({s})"))
                .unwrap_or_default()
        );
    }
    if let Some(rating) = record.rating.as_ref().filter(|r| r.pending) {
        println!(
            "Survey pending{}",
            rating
                .encounter_id
                .map(|id| format!(" for encounter {id}"))
                .unwrap_or_default()
        );
    }
    if let Some(expiry) = portal.credentials.expires_at() {
        println!("Backup:   valid until {}", expiry.to_rfc3339());
    }
    Ok(ExitCode::SUCCESS)
}

fn open(portal: &Portal, path: &str) -> Result<ExitCode> {
    portal.boot(path);
    let guard = AccessGuard::new(portal.credentials.clone(), portal.config.routes.clone());
    match guard.check(path) {
        GuardDecision::Grant { .. } => {
            println!("Access granted: {path}");
            Ok(ExitCode::SUCCESS)
        }
        GuardDecision::Deny(redirect) => {
            println!("Access denied; redirect to {}", redirect.location());
            Ok(ExitCode::from(1))
        }
    }
}

fn headers(portal: &Portal) -> Result<ExitCode> {
    portal.boot("/");
    let device = device_id(portal.durable.as_ref());
    let headers = auth_headers(&portal.credentials, &device)
        .context("Cannot authenticate API calls; sign in again")?;
    for (name, value) in &headers {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    Ok(ExitCode::SUCCESS)
}

async fn provision(
    portal: &Portal,
    encounter: u64,
    patient: Option<String>,
    clinician: Option<String>,
) -> Result<ExitCode> {
    portal.boot("/");
    let session = portal.credentials.read();

    let patient_id = patient
        .or_else(|| session.as_ref().map(|s| s.patient.code.clone()))
        .context("No patient given and no session to take it from")?;
    let clinician_id = clinician
        .or_else(|| {
            session.as_ref().and_then(|s| {
                s.schedule
                    .iter()
                    .find(|e| e.encounter_id == encounter)
                    .and_then(|e| e.clinician_id.clone())
            })
        })
        .or_else(|| portal.config.clinician_id.clone())
        .context("No clinician given (use --clinician or MEDLINK_CLINICIAN_ID)")?;

    let client = GatewayClient::new(&portal.config.gateway_url, &portal.config.records_url)
        .context("Failed to create gateway client")?
        .with_retry_config(portal.config.retry.clone());
    let provisioner = RoomProvisioner::new(Arc::new(client));

    let request = ProvisionRequest {
        encounter_id: encounter,
        patient_id,
        clinician_id,
    };
    match provisioner.provision(&request).await {
        Ok(provisioned) => {
            if provisioned.origin == RoomOrigin::Created && provisioned.persisted == Some(false) {
                eprintln!("warning: room mapping was not recorded; a later call may create a new room");
            }
            println!("{}", serde_json::to_string_pretty(&provisioned.handle)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::debug!("Provisioning failed: {e:?}");
            eprintln!("Unable to start consultation: {e}");
            Ok(ExitCode::from(1))
        }
    }
}
