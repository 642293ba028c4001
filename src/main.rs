use powermap::cli::{Cli, Commands, ConfigAction, Scenario, ScenarioRelationshipKind};
use powermap::config::Config;
use powermap::crypto::{EncryptedField, EncryptionService, TenantKey};
use powermap::error::{PowerMapError, Result};
use powermap::graph::{GraphSnapshot, Player, Relationship, TieType};
use powermap::insight::{narrative, InsightComposer};
use powermap::metrics::{self, MetricsResult};
use powermap::tenant::{SourceFeed, TenantContext};

use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    // Parse CLI arguments
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Analyze {
            input,
            output,
            profile,
            key,
        } => {
            cmd_analyze(cli.config, input, output, profile, key)?;
        }
        Commands::Keygen => {
            println!("{}", TenantKey::generate().to_base64());
        }
        Commands::EncryptNotes { key, text } => {
            cmd_encrypt_notes(&key, &text)?;
        }
        Commands::DecryptNotes { key, token } => {
            cmd_decrypt_notes(&key, &token)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("powermap=info"));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_analyze(
    config_path: Option<PathBuf>,
    input: PathBuf,
    output: Option<PathBuf>,
    profile: Option<String>,
    key: Option<String>,
) -> Result<()> {
    let config = load_config(config_path, profile)?;

    let raw = std::fs::read_to_string(&input).map_err(|e| PowerMapError::Io {
        source: e,
        context: format!("Failed to read scenario file: {:?}", input),
    })?;
    let scenario: Scenario = serde_json::from_str(&raw).map_err(|e| PowerMapError::Json {
        source: e,
        context: format!("Failed to parse scenario file: {:?}", input),
    })?;

    let key = key.map(|k| TenantKey::from_base64(&k)).transpose()?;

    // Drive the engine inside a runtime, then render the report outside
    // it so a live narrative provider can own its own runtime.
    let rt = tokio::runtime::Runtime::new().map_err(|e| PowerMapError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    let (snapshot, metrics, players, notes) =
        rt.block_on(run_scenario(&config, scenario, key.as_ref()))?;

    let provider = narrative::provider_from_config(&config.narrative)?;
    let composer = InsightComposer::with_provider(config.engine.top_k, provider);
    let report = composer.compose(&snapshot, &metrics, &players, notes.as_ref());

    let document = serde_json::json!({
        "snapshot": &*snapshot,
        "metrics": metrics,
        "report": report,
    });
    let rendered =
        serde_json::to_string_pretty(&document).map_err(|e| PowerMapError::Json {
            source: e,
            context: "Failed to serialize report".to_string(),
        })?;

    match output {
        Some(path) => {
            std::fs::write(&path, rendered).map_err(|e| PowerMapError::Io {
                source: e,
                context: format!("Failed to write report: {:?}", path),
            })?;
            println!("✓ Report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}

/// Load the scenario into a fresh tenant, build, and compute metrics
async fn run_scenario(
    config: &Config,
    scenario: Scenario,
    key: Option<&TenantKey>,
) -> Result<(
    Arc<GraphSnapshot>,
    MetricsResult,
    Vec<Player>,
    Option<HashMap<Uuid, String>>,
)> {
    let ctx = TenantContext::new(Uuid::new_v4(), config)?;

    let mut by_name: HashMap<String, Uuid> = HashMap::new();
    for declared in &scenario.players {
        let mut player = Player::new(&declared.name);
        player.role = declared.role.clone();
        player.department = declared.department.clone();
        player.influence_level = declared.influence_level;
        player.relationship_status = declared.relationship_status;
        for handle in &declared.handles {
            player.add_handle(handle);
        }
        let id = ctx.upsert_player(player)?;
        by_name.insert(declared.name.clone(), id);

        match (&declared.notes, key) {
            (Some(text), Some(key)) => ctx.set_player_notes(id, key, text)?,
            (Some(_), None) => {
                tracing::warn!(
                    "Dropping notes for '{}': no tenant key supplied",
                    declared.name
                );
            }
            _ => {}
        }
    }

    for declared in &scenario.relationships {
        let resolve = |name: &str| -> Result<Uuid> {
            by_name.get(name).copied().ok_or_else(|| {
                PowerMapError::Config(format!("Relationship references unknown player: {}", name))
            })
        };
        let from = resolve(&declared.from)?;
        let to = resolve(&declared.to)?;

        let relationship = match declared.kind {
            ScenarioRelationshipKind::Formal => Relationship::formal(from, to),
            ScenarioRelationshipKind::Informal => Relationship::informal(
                from,
                to,
                declared.tie.unwrap_or(TieType::Other),
                declared.strength.unwrap_or(5),
            )?,
        };
        ctx.upsert_relationship(relationship)?;
    }

    let as_of = scenario.as_of.unwrap_or_else(Utc::now);
    let snapshot = if scenario.records.is_empty() {
        ctx.rebuild(as_of).await?
    } else {
        let records = scenario.records.clone();
        let feed = SourceFeed::new("scenario", async move { Ok(records) });
        ctx.ingest_sources(vec![feed], as_of).await?
    };

    let metrics = metrics::compute(&snapshot);
    let players = ctx.players();
    let notes = match key {
        Some(key) => Some(ctx.decrypted_notes(key)?),
        None => None,
    };

    ctx.shutdown().await;
    Ok((snapshot, metrics, players, notes))
}

fn cmd_encrypt_notes(key: &str, text: &str) -> Result<()> {
    let key = TenantKey::from_base64(key)?;
    let field = EncryptionService::encrypt(&key, text)?;
    let rendered = serde_json::to_string(&field).map_err(|e| PowerMapError::Json {
        source: e,
        context: "Failed to serialize token".to_string(),
    })?;
    println!("{}", rendered);
    Ok(())
}

fn cmd_decrypt_notes(key: &str, token: &str) -> Result<()> {
    let key = TenantKey::from_base64(key)?;
    let field: EncryptedField = serde_json::from_str(token).map_err(|e| PowerMapError::Json {
        source: e,
        context: "Failed to parse token".to_string(),
    })?;
    let plaintext = EncryptionService::decrypt(&key, &field)?;
    println!("{}", plaintext);
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, None)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| PowerMapError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| PowerMapError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'powermap config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}
