use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use freeipa_client::{IpaClient, IpaClientBuilder, Params};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "ipa-cli",
    version,
    about = "Small async CLI for calling FreeIPA JSON-RPC commands"
)]
struct Cli {
    /// FreeIPA server host name or URL (a DNS domain with --dns-discovery).
    #[arg(long, env = "IPA_HOST")]
    host: Option<String>,

    /// Additional server to fail over to. Repeat as needed.
    #[arg(long = "fallback-server", value_name = "HOST")]
    fallback_servers: Vec<String>,

    /// Look up servers through the `_ldap._tcp` SRV records of --host.
    #[arg(long, env = "IPA_DNS_DISCOVERY")]
    dns_discovery: bool,

    /// User for password login. Without it, requests are sent unauthenticated.
    #[arg(long, env = "IPA_USER")]
    user: Option<String>,

    /// Password for --user.
    #[arg(long, env = "IPA_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// API version sent with every command. Defaults to the catalog version.
    #[arg(long, env = "IPA_API_VERSION")]
    api_version: Option<String>,

    /// Skip TLS certificate verification.
    #[arg(long, env = "IPA_INSECURE")]
    insecure: bool,

    /// Emit compact JSON instead of pretty-printed output.
    #[arg(long)]
    compact: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the generated FreeIPA command catalog.
    Commands {
        /// Filter commands by substring match on the name (case-insensitive).
        #[arg(long)]
        filter: Option<String>,
    },
    /// Call a catalog command; schema defaults are applied.
    Call(CallArgs),
    /// Send a command as-is, without consulting the catalog.
    Raw(CallArgs),
    /// Change a user's password through the password change endpoint.
    ChangePassword(ChangePasswordArgs),
}

#[derive(Debug, Args)]
struct CallArgs {
    /// Command name (for example: user_show).
    command: String,

    /// Positional arguments; JSON values are parsed, anything else is a string.
    args: Vec<String>,

    /// Named parameter in form key=value. Repeat as needed.
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// JSON object merged into the named parameters.
    #[arg(long, conflicts_with = "params_file")]
    params_json: Option<String>,

    /// Path to a file containing a JSON object of named parameters.
    #[arg(long, value_name = "PATH", conflicts_with = "params_json")]
    params_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ChangePasswordArgs {
    /// User whose password changes.
    user: String,

    #[arg(long, env = "IPA_OLD_PASSWORD", hide_env_values = true)]
    old_password: String,

    #[arg(long, env = "IPA_NEW_PASSWORD", hide_env_values = true)]
    new_password: String,

    /// One-time password, when the user has an OTP token.
    #[arg(long)]
    otp: Option<String>,
}

/// Entry point for the async CLI.
///
/// Parses command-line arguments, builds a client (logging in when a user is
/// given), dispatches subcommands, and prints JSON output.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "freeipa_client=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // `commands` is metadata-only; it does not require constructing an HTTP client.
    if let Command::Commands { filter } = &cli.command {
        print_commands(filter.as_deref());
        return Ok(());
    }

    let client = build_client(&cli)?;

    if let Command::ChangePassword(args) = &cli.command {
        client
            .change_password(
                &args.user,
                &args.old_password,
                &args.new_password,
                args.otp.as_deref(),
            )
            .await
            .with_context(|| format!("password change failed for '{}'", args.user))?;
        eprintln!("Password changed for '{}'.", args.user);
        return Ok(());
    }

    if let Some(user) = &cli.user {
        let Some(password) = &cli.password else {
            bail!("--user requires --password (or IPA_PASSWORD)");
        };
        client
            .login(user, password)
            .await
            .with_context(|| format!("login failed for user '{user}'"))?;
    }

    let output = match &cli.command {
        Command::Commands { .. } | Command::ChangePassword(_) => unreachable!("handled above"),
        Command::Call(args) => call_command(&client, args)
            .await
            .with_context(|| format!("command failed: '{}'", args.command))?,
        Command::Raw(args) => send_raw(&client, args)
            .await
            .with_context(|| format!("raw command failed: '{}'", args.command))?,
    };

    print_json(&output, cli.compact).context("failed to print JSON output")?;
    Ok(())
}

fn build_client(cli: &Cli) -> Result<IpaClient> {
    let Some(host) = &cli.host else {
        bail!("no FreeIPA server given; use --host or IPA_HOST");
    };

    let mut builder = IpaClientBuilder::new(host.clone())
        .with_verify_ssl(!cli.insecure)
        .with_fallback_servers(cli.fallback_servers.iter().cloned());
    if let Some(version) = &cli.api_version {
        builder = builder.with_version(version.clone());
    }
    if cli.dns_discovery {
        builder = with_system_discovery(builder)?;
    }

    builder
        .build()
        .with_context(|| format!("failed to create client for '{host}'"))
}

#[cfg(feature = "dns-discovery")]
fn with_system_discovery(builder: IpaClientBuilder) -> Result<IpaClientBuilder> {
    Ok(builder.with_dns_discovery(freeipa_client::SystemResolver))
}

#[cfg(not(feature = "dns-discovery"))]
fn with_system_discovery(_builder: IpaClientBuilder) -> Result<IpaClientBuilder> {
    bail!("--dns-discovery needs ipa-cli built with the `dns-discovery` feature")
}

/// Prints the generated command catalog.
///
/// When `filter` is provided, only command names containing that substring are shown.
fn print_commands(filter: Option<&str>) {
    let filter = filter.map(str::to_ascii_lowercase);

    let commands: Vec<_> = IpaClient::commands()
        .iter()
        .filter(|command| {
            filter
                .as_ref()
                .is_none_or(|needle| command.name.contains(needle.as_str()))
        })
        .collect();

    let name_width = commands
        .iter()
        .map(|command| command.name.len())
        .max()
        .unwrap_or_default();

    for command in commands {
        let args: Vec<_> = command
            .args
            .iter()
            .map(|arg| {
                if arg.required {
                    arg.name.to_owned()
                } else {
                    format!("[{}]", arg.name)
                }
            })
            .chain(
                command
                    .options
                    .iter()
                    .filter(|option| option.required)
                    .map(|option| format!("--param {}=...", option.name)),
            )
            .collect();
        println!(
            "{:<name_width$}  {:<40}  {}",
            command.name,
            args.join(" "),
            command.summary
        );
    }
}

/// Calls a catalog command with schema defaults applied.
async fn call_command(client: &IpaClient, args: &CallArgs) -> Result<Value> {
    let positional = args.args.iter().map(|raw| parse_value(raw)).collect();
    let params = collect_params(args)?;

    let value = client
        .call_command(&args.command, positional, Params::from(params))
        .await
        .with_context(|| format!("FreeIPA command '{}' returned an error", args.command))?;
    Ok(value)
}

/// Sends a command verbatim via `IpaClient::call_raw`.
async fn send_raw(client: &IpaClient, args: &CallArgs) -> Result<Value> {
    let positional = args.args.iter().map(|raw| parse_value(raw)).collect();
    let params = collect_params(args)?;

    let value = client
        .call_raw(&args.command, positional, params)
        .await
        .with_context(|| format!("FreeIPA method '{}' returned an error", args.command))?;
    Ok(value)
}

/// Merges the JSON object input and repeated `--param` pairs; pairs win.
fn collect_params(args: &CallArgs) -> Result<Map<String, Value>> {
    let mut params = parse_params_object(args).context("failed to parse parameter input")?;
    for (key, value) in parse_pairs(&args.params, "--param")? {
        params.insert(key, value);
    }
    Ok(params)
}

/// Parses repeated `key=value` arguments.
///
/// Returns an error when a value does not include `=` or has an empty key.
fn parse_pairs(values: &[String], flag_name: &str) -> Result<Vec<(String, Value)>> {
    let mut pairs = Vec::with_capacity(values.len());
    for item in values {
        let Some((key, value)) = item.split_once('=') else {
            bail!("invalid {flag_name} value '{item}': expected key=value");
        };
        if key.is_empty() {
            bail!("invalid {flag_name} value '{item}': empty key");
        }
        pairs.push((key.to_owned(), parse_value(value)));
    }
    Ok(pairs)
}

/// Reads `true`, `5` or `["a","b"]` as JSON and anything else as a string.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

/// Parses the optional JSON object from inline text or a file path.
fn parse_params_object(args: &CallArgs) -> Result<Map<String, Value>> {
    let raw = match (&args.params_json, &args.params_file) {
        (Some(raw), None) => raw.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read --params-file '{}'", path.display()))?,
        (None, None) => return Ok(Map::new()),
        (Some(_), Some(_)) => bail!("use only one of --params-json or --params-file"),
    };

    match serde_json::from_str(&raw).context("parameters are not valid JSON")? {
        Value::Object(object) => Ok(object),
        other => bail!("parameters must be a JSON object, got {other}"),
    }
}

/// Prints a JSON value either compact or pretty-formatted.
fn print_json(value: &Value, compact: bool) -> Result<()> {
    if compact {
        println!(
            "{}",
            serde_json::to_string(value).context("Failed to render JSON")?
        );
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to render JSON")?
        );
    }
    Ok(())
}
