//! CLI command definitions and scenario file schema
use crate::graph::{RelationshipStatus, TieType};
use crate::normalizer::RawSourceRecord;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "powermap",
    version,
    author = "subtext-labs",
    about = "Organizational power-map engine",
    long_about = "Powermap builds a weighted influence graph for one organization from manual \
                  relationship entry and communication metadata, computes centrality and \
                  brokerage metrics, and produces ranked insight reports. Sensitive notes are \
                  protected with field-level encryption."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/powermap/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a power map from a scenario file and print the report
    Analyze {
        /// Scenario JSON file (players, relationships, raw records)
        input: PathBuf,

        /// Write the report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Profile to apply (e.g. "short-horizon")
        #[arg(short, long)]
        profile: Option<String>,

        /// Tenant key (base64) used to encrypt scenario notes and feed
        /// decrypted notes into the report
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Generate a fresh tenant key (base64)
    Keygen,

    /// Encrypt a sensitive text under a tenant key
    EncryptNotes {
        /// Tenant key (base64)
        #[arg(short, long)]
        key: String,

        /// Plaintext to encrypt
        text: String,
    },

    /// Decrypt an encrypted field token (explicit decrypt path)
    DecryptNotes {
        /// Tenant key (base64)
        #[arg(short, long)]
        key: String,

        /// Token JSON ({"alg":...,"keyId":...,"ciphertext":...})
        token: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Scenario file: one tenant's declared world plus raw source records
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    #[serde(default)]
    pub players: Vec<ScenarioPlayer>,
    #[serde(default)]
    pub relationships: Vec<ScenarioRelationship>,
    #[serde(default)]
    pub records: Vec<RawSourceRecord>,
    /// Reference time for decay and retention (defaults to now)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioPlayer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default = "default_influence")]
    pub influence_level: u8,
    #[serde(default = "default_status")]
    pub relationship_status: RelationshipStatus,
    #[serde(default)]
    pub handles: Vec<String>,
    /// Plaintext notes; encrypted at load time when a key is supplied,
    /// dropped otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_influence() -> u8 {
    5
}

fn default_status() -> RelationshipStatus {
    RelationshipStatus::Unknown
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRelationship {
    /// Player name of the edge source (for formal: the manager)
    pub from: String,
    /// Player name of the edge target (for formal: the report)
    pub to: String,
    pub kind: ScenarioRelationshipKind,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub tie: Option<TieType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioRelationshipKind {
    Formal,
    Informal,
}
