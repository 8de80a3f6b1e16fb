//! exitnet Control CLI
//!
//! Command-line interface for the exitnet coordinator API.

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tabled::Tabled;

#[derive(Parser, Debug)]
#[command(name = "exitnetctl")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    api: String,

    /// Bearer token
    #[arg(long)]
    token: Option<String>,

    /// Act as this wallet (sent as X-Wallet-Address when no token is given)
    #[arg(long)]
    wallet: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show network-wide statistics
    Stats,
    /// List hosts available to clients, best first
    Available,
    /// Show the status of a node
    Status,
    /// Show rewards for a wallet
    Rewards {
        /// Wallet address (defaults to the caller)
        wallet: Option<String>,
    },
    /// Claim accumulated rewards
    Claim,
    /// Manage the caller's tunnel config
    Tunnel {
        #[command(subcommand)]
        cmd: TunnelCommands,
    },
    /// Issue a bearer token for a wallet (admin)
    Token {
        wallet: String,
        /// Grant admin rights
        #[arg(long)]
        admin: bool,
    },
    /// Override the demand multiplier of a region (admin)
    Demand {
        region: String,
        multiplier: f64,
        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        ttl: u64,
    },
}

#[derive(Subcommand, Debug)]
enum TunnelCommands {
    /// Print the WireGuard client file, creating the config if needed
    Show,
    /// Issue a new key pair
    Regenerate,
    /// Deactivate the config
    Deactivate,
    /// Provisioner health
    Status,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Location {
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Performance {
    bandwidth: f64,
    latency: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScoredNode {
    wallet_address: String,
    ip: Option<String>,
    location: Location,
    performance: Performance,
    connected_users: u32,
    score: f64,
}

#[derive(Debug, Tabled)]
struct HostRow {
    wallet: String,
    ip: String,
    country: String,
    bandwidth: String,
    latency: String,
    users: u32,
    score: f64,
}

impl From<ScoredNode> for HostRow {
    fn from(n: ScoredNode) -> Self {
        Self {
            wallet: n.wallet_address,
            ip: n.ip.unwrap_or_else(|| "-".to_string()),
            country: n.location.country.unwrap_or_else(|| "Unknown".to_string()),
            bandwidth: format!("{:.1}", n.performance.bandwidth),
            latency: format!("{:.0} ms", n.performance.latency),
            users: n.connected_users,
            score: n.score,
        }
    }
}

#[derive(Debug, Tabled)]
struct Field {
    field: String,
    value: String,
}

/// Flatten the scalar fields of a JSON object into table rows
fn fields(body: &Value) -> Vec<Field> {
    let Some(map) = body.as_object() else {
        return Vec::new();
    };
    map.iter()
        .filter(|(k, v)| k.as_str() != "success" && !v.is_object() && !v.is_array())
        .map(|(k, v)| Field {
            field: k.clone(),
            value: match v {
                Value::String(s) => s.clone(),
                Value::Null => "-".to_string(),
                other => other.to_string(),
            },
        })
        .collect()
}

struct Api {
    client: Client,
    base: String,
    token: Option<String>,
    wallet: Option<String>,
}

impl Api {
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match (&self.token, &self.wallet) {
            (Some(token), _) => req.bearer_auth(token),
            (None, Some(wallet)) => req.header("X-Wallet-Address", wallet),
            (None, None) => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Value> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body: Value = resp.json().await?;
        if !status.is_success() {
            let msg = body["error"].as_str().unwrap_or("request failed");
            bail!("{} ({})", msg, status);
        }
        Ok(body)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.send(self.client.get(format!("{}{}", self.base, path)))
            .await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.send(self.client.post(format!("{}{}", self.base, path)).json(&body))
            .await
    }

    async fn delete(&self, path: &str) -> Result<Value> {
        self.send(self.client.delete(format!("{}{}", self.base, path)))
            .await
    }
}

fn print_fields(body: &Value) {
    println!("{}", tabled::Table::new(fields(body)));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let api = Api {
        client: Client::new(),
        base: args.api.trim_end_matches('/').to_string(),
        token: args.token,
        wallet: args.wallet.clone(),
    };

    match args.command {
        Commands::Stats => {
            let body = api.get("/api/network-stats").await?;
            print_fields(&body);
        }
        Commands::Available => {
            let body = api.get("/api/available-nodes").await?;
            let nodes: Vec<ScoredNode> = serde_json::from_value(body["nodes"].clone())?;
            let rows: Vec<HostRow> = nodes.into_iter().map(HostRow::from).collect();
            println!("{}", tabled::Table::new(rows));
        }
        Commands::Status => {
            let body = api.get("/api/status").await?;
            print_fields(&body);
        }
        Commands::Rewards { wallet } => {
            let Some(wallet) = wallet.or(args.wallet) else {
                bail!("a wallet is required: pass it or use --wallet");
            };
            let body = api.get(&format!("/api/node-rewards/{}", wallet)).await?;
            print_fields(&body);
        }
        Commands::Claim => {
            let body = api.post("/api/daily-claims/claim", json!({})).await?;
            print_fields(&body);
        }
        Commands::Tunnel { cmd } => match cmd {
            TunnelCommands::Show => {
                let body = api.get("/api/wireguard/config").await?;
                print!("{}", body["configFile"].as_str().unwrap_or_default());
            }
            TunnelCommands::Regenerate => {
                let body = api.post("/api/wireguard/config", json!({})).await?;
                print!("{}", body["configFile"].as_str().unwrap_or_default());
            }
            TunnelCommands::Deactivate => {
                api.delete("/api/wireguard/config").await?;
                println!("Tunnel config deactivated");
            }
            TunnelCommands::Status => {
                let body = api.get("/api/wireguard/status").await?;
                print_fields(&body);
            }
        },
        Commands::Token { wallet, admin } => {
            let body = api
                .post(
                    "/api/admin/tokens",
                    json!({ "walletAddress": wallet, "isAdmin": admin }),
                )
                .await?;
            println!("{}", body["token"].as_str().unwrap_or_default());
        }
        Commands::Demand {
            region,
            multiplier,
            ttl,
        } => {
            api.post(
                "/api/admin/demand",
                json!({ "region": region, "multiplier": multiplier, "ttlSecs": ttl }),
            )
            .await?;
            println!("Demand multiplier for {} set to {} for {}s", region, multiplier, ttl);
        }
    }

    Ok(())
}
