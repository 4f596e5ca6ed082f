//! krbgate CLI - Command line interface.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::{Parser, Subcommand};
use krbgate_crypto::keytab::{NT_PRINCIPAL, NT_SRV_INST};
use krbgate_crypto::string_to_key::default_salt;
use krbgate_crypto::{EncryptionKey, EncryptionType, Keytab, KeytabEntry};
use krbgate_spnego::ServicePrincipal;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "krbgate")]
#[command(about = "krbgate CLI - Kerberos login gateway")]
#[command(version)]
struct Cli {
    /// krbgate server address
    #[arg(long, default_value = "http://localhost:8200", env = "KRBGATE_ADDR")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Keytab management
    Keytab {
        #[command(subcommand)]
        command: KeytabCommands,
    },
    /// Log in with a SPNEGO token
    Login {
        /// Base64 negotiation token (with or without the `Negotiate` prefix)
        #[arg(long)]
        token: String,
        /// Requested TTL, e.g. 1h30m
        #[arg(long)]
        ttl: Option<String>,
    },
    /// Check server status
    Status,
}

#[derive(Subcommand)]
enum KeytabCommands {
    /// Create a keytab from a password
    Create {
        /// Principal, e.g. HTTP/gate.example.com@EXAMPLE.COM
        #[arg(long)]
        principal: String,
        /// Password (prefer --password-stdin)
        #[arg(long, conflicts_with = "password_stdin")]
        password: Option<String>,
        /// Read the password from stdin
        #[arg(long)]
        password_stdin: bool,
        /// Encryption types to derive
        #[arg(long = "etype", default_values = ["aes256-cts-hmac-sha1-96", "aes128-cts-hmac-sha1-96"])]
        etypes: Vec<EncryptionType>,
        /// Key version number
        #[arg(long, default_value = "1")]
        kvno: u32,
        /// Output file
        #[arg(long)]
        out: PathBuf,
        /// Write base64 instead of binary
        #[arg(long)]
        base64: bool,
    },
    /// List keytab entries
    List {
        /// Keytab file, binary or base64
        file: PathBuf,
    },
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
    backend: String,
    configured: bool,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ttl: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    auth: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    errors: Vec<String>,
}

// ============================================================================
// HTTP Client
// ============================================================================

struct KrbgateClient {
    client: Client,
    base_url: String,
}

impl KrbgateClient {
    fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_health(&self) -> Result<HealthResponse> {
        let resp = self
            .client
            .get(self.url("/v1/sys/health"))
            .send()
            .await
            .context("Failed to connect to server")?;

        if !resp.status().is_success() {
            bail!("Server error: {}", error_message(resp).await);
        }

        resp.json().await.context("Failed to parse response")
    }

    async fn login(&self, token: &str, ttl: Option<&str>) -> Result<(LoginResponse, Option<String>)> {
        let resp = self
            .client
            .post(self.url("/v1/auth/kerberos/login"))
            .header(AUTHORIZATION, negotiate_header(token))
            .json(&LoginRequest { ttl })
            .send()
            .await
            .context("Failed to connect to server")?;

        let negotiate = resp
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match resp.status() {
            StatusCode::OK => {
                let body = resp.json().await.context("Failed to parse response")?;
                Ok((body, negotiate))
            },
            StatusCode::UNAUTHORIZED => bail!(
                "Login failed: {} (server answered {})",
                error_message(resp).await,
                negotiate.as_deref().unwrap_or("no challenge")
            ),
            _ => bail!("Login failed: {}", error_message(resp).await),
        }
    }
}

async fn error_message(resp: reqwest::Response) -> String {
    resp.json::<ErrorResponse>()
        .await
        .ok()
        .and_then(|e| e.errors.into_iter().next())
        .unwrap_or_else(|| "Unknown error".into())
}

fn negotiate_header(token: &str) -> String {
    let token = token.trim();
    if token
        .get(..9)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("negotiate"))
    {
        token.to_string()
    } else {
        format!("Negotiate {token}")
    }
}

// ============================================================================
// Keytabs
// ============================================================================

fn build_keytab(principal: &str, password: &str, etypes: &[EncryptionType], kvno: u32) -> Result<Keytab> {
    let principal: ServicePrincipal = principal.parse().context("Invalid principal")?;
    let realm = principal
        .realm()
        .context("Principal must include a realm (name@REALM)")?;
    if etypes.is_empty() {
        bail!("At least one encryption type is required");
    }

    let components = principal.components().to_vec();
    let salt = default_salt(realm, &components);
    let name_type = if components.len() > 1 {
        NT_SRV_INST
    } else {
        NT_PRINCIPAL
    };
    let timestamp = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();

    let mut keytab = Keytab::new();
    for etype in etypes {
        let key = EncryptionKey::from_password(*etype, password, &salt)
            .with_context(|| format!("Failed to derive {etype} key"))?;
        keytab.push(
            KeytabEntry::new(realm, components.clone(), kvno, timestamp, &key).with_name_type(name_type),
        );
    }
    Ok(keytab)
}

fn read_keytab(path: &Path) -> Result<Keytab> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bytes = if raw.first() == Some(&0x05) {
        raw
    } else {
        let text = String::from_utf8(raw).context("Keytab is neither binary nor base64")?;
        BASE64
            .decode(text.trim())
            .context("Keytab is neither binary nor base64")?
    };
    Keytab::parse(&bytes).context("Failed to parse keytab")
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn cmd_status(client: &KrbgateClient) -> Result<()> {
    let health = client.get_health().await?;

    println!("krbgate server status:");
    println!("  Status:     {}", health.status);
    println!("  Version:    {}", health.version);
    println!("  Backend:    {}", health.backend);
    println!("  Configured: {}", health.configured);

    Ok(())
}

async fn cmd_login(client: &KrbgateClient, token: &str, ttl: Option<&str>) -> Result<()> {
    let (response, negotiate) = client.login(token, ttl).await?;

    println!("{}", serde_json::to_string_pretty(&response.auth)?);
    if let Some(negotiate) = negotiate {
        println!();
        println!("WWW-Authenticate: {negotiate}");
    }

    Ok(())
}

struct CreateArgs {
    principal: String,
    password: Option<String>,
    password_stdin: bool,
    etypes: Vec<EncryptionType>,
    kvno: u32,
    out: PathBuf,
    base64: bool,
}

fn cmd_keytab_create(args: CreateArgs) -> Result<()> {
    let password = match (args.password, args.password_stdin) {
        (Some(p), _) => p,
        (None, true) => {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        },
        (None, false) => bail!("Provide --password or --password-stdin"),
    };
    if password.is_empty() {
        bail!("Password cannot be empty");
    }

    let keytab = build_keytab(&args.principal, &password, &args.etypes, args.kvno)?;
    let bytes = keytab.to_bytes();
    if args.base64 {
        std::fs::write(&args.out, BASE64.encode(&bytes))
    } else {
        std::fs::write(&args.out, &bytes)
    }
    .with_context(|| format!("Failed to write {}", args.out.display()))?;

    println!(
        "Wrote {} entries for {} to {}",
        keytab.entries().len(),
        args.principal,
        args.out.display()
    );

    Ok(())
}

fn cmd_keytab_list(path: &Path) -> Result<()> {
    let keytab = read_keytab(path)?;

    if keytab.is_empty() {
        println!("No entries found");
        return Ok(());
    }

    println!("{:<6} {:<28} PRINCIPAL", "KVNO", "ENCTYPE");
    for entry in keytab.entries() {
        let etype = EncryptionType::from_id(entry.key_type)
            .map(|e| e.name().to_string())
            .unwrap_or_else(|_| format!("etype {}", entry.key_type));
        println!("{:<6} {:<28} {}", entry.kvno, etype, entry.principal());
    }

    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Status => cmd_status(&KrbgateClient::new(&cli.addr)?).await,
        Commands::Login { token, ttl } => {
            cmd_login(&KrbgateClient::new(&cli.addr)?, &token, ttl.as_deref()).await
        },
        Commands::Keytab { command } => match command {
            KeytabCommands::Create {
                principal,
                password,
                password_stdin,
                etypes,
                kvno,
                out,
                base64,
            } => cmd_keytab_create(CreateArgs {
                principal,
                password,
                password_stdin,
                etypes,
                kvno,
                out,
                base64,
            }),
            KeytabCommands::List { file } => cmd_keytab_list(&file),
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_build_keytab() {
        let keytab = build_keytab(
            "HTTP/gate.example.com@EXAMPLE.COM",
            "secret",
            &[
                EncryptionType::Aes256CtsHmacSha196,
                EncryptionType::Aes128CtsHmacSha196,
            ],
            4,
        )
        .unwrap();

        assert_eq!(keytab.entries().len(), 2);
        let entry = &keytab.entries()[0];
        assert_eq!(entry.principal(), "HTTP/gate.example.com@EXAMPLE.COM");
        assert_eq!(entry.name_type, NT_SRV_INST);
        assert_eq!(entry.kvno, 4);

        let expected = EncryptionKey::from_password(
            EncryptionType::Aes256CtsHmacSha196,
            "secret",
            "EXAMPLE.COMHTTPgate.example.com",
        )
        .unwrap();
        assert_eq!(entry.key().unwrap().as_bytes(), expected.as_bytes());
    }

    #[test]
    fn test_build_keytab_requires_realm() {
        assert!(build_keytab("alice", "secret", &[EncryptionType::Aes128CtsHmacSha196], 1).is_err());
        assert!(build_keytab("alice@EXAMPLE.COM", "secret", &[], 1).is_err());
    }

    #[test]
    fn test_read_keytab_binary_and_base64() {
        let keytab = build_keytab("alice@EXAMPLE.COM", "pw", &[EncryptionType::Aes128CtsHmacSha196], 1).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let binary = dir.path().join("binary.keytab");
        std::fs::write(&binary, keytab.to_bytes()).unwrap();
        assert_eq!(read_keytab(&binary).unwrap().entries().len(), 1);

        let encoded = dir.path().join("encoded.keytab");
        std::fs::write(&encoded, format!("{}\n", BASE64.encode(keytab.to_bytes()))).unwrap();
        assert_eq!(read_keytab(&encoded).unwrap().entries().len(), 1);
    }

    #[test]
    fn test_negotiate_header() {
        assert_eq!(negotiate_header("YIIB"), "Negotiate YIIB");
        assert_eq!(negotiate_header("negotiate YIIB"), "negotiate YIIB");
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from([
            "krbgate",
            "keytab",
            "create",
            "--principal",
            "HTTP/gate@EXAMPLE.COM",
            "--password-stdin",
            "--etype",
            "aes256-cts-hmac-sha384-192",
            "--out",
            "gate.keytab",
        ])
        .unwrap();
        match cli.command {
            Commands::Keytab {
                command: KeytabCommands::Create { etypes, kvno, .. },
            } => {
                assert_eq!(etypes, vec![EncryptionType::Aes256CtsHmacSha384192]);
                assert_eq!(kvno, 1);
            },
            _ => panic!("unexpected command"),
        }
    }
}
