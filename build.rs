//! Generates the FreeIPA command registry and per-command client methods from
//! `schema/commands.json`.
//!
//! Outputs (in `$OUT_DIR`):
//! - `ipa_commands.rs`: `IPA_SCHEMA_VERSION` and the sorted `IPA_COMMANDS` table.
//! - `ipa_async_methods.rs`: one `IpaClient` method per command.
//! - `ipa_blocking_methods.rs`: one `BlockingIpaClient` method per command.

use std::env;
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use serde_json::Value;

const SCHEMA_PATH: &str = "schema/commands.json";

const RUST_KEYWORDS: &[&str] = &[
    "as", "async", "await", "break", "const", "continue", "dyn", "else", "enum", "extern",
    "false", "fn", "for", "gen", "if", "impl", "in", "let", "loop", "match", "mod", "move", "mut",
    "pub", "ref", "return", "static", "struct", "trait", "true", "type", "unsafe", "use", "where",
    "while", "yield",
];

struct Arg {
    name: String,
    required: bool,
    multivalue: bool,
}

struct Opt {
    name: String,
    required: bool,
    default: Option<Value>,
}

struct Command {
    name: String,
    summary: String,
    args: Vec<Arg>,
    options: Vec<Opt>,
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed={SCHEMA_PATH}");
    println!("cargo:rerun-if-changed=build.rs");

    let raw = fs::read_to_string(SCHEMA_PATH)?;
    let schema: Value = serde_json::from_str(&raw)?;

    let version = schema
        .get("version")
        .and_then(Value::as_str)
        .ok_or("schema is missing a string `version`")?
        .to_owned();
    let mut commands = parse_commands(&schema)?;
    commands.sort_by(|left, right| left.name.cmp(&right.name));
    if let Some(pair) = commands.windows(2).find(|pair| pair[0].name == pair[1].name) {
        return Err(format!("duplicate command '{}' in schema", pair[0].name).into());
    }

    let out_dir = env::var("OUT_DIR")?;
    let out_dir = Path::new(&out_dir);
    fs::write(
        out_dir.join("ipa_commands.rs"),
        render_registry(&version, &commands)?,
    )?;
    fs::write(
        out_dir.join("ipa_async_methods.rs"),
        render_methods("crate::IpaClient", true, &commands)?,
    )?;
    fs::write(
        out_dir.join("ipa_blocking_methods.rs"),
        render_methods("crate::BlockingIpaClient", false, &commands)?,
    )?;
    Ok(())
}

fn parse_commands(schema: &Value) -> Result<Vec<Command>, Box<dyn Error>> {
    let entries = schema
        .get("commands")
        .and_then(Value::as_array)
        .ok_or("schema is missing a `commands` array")?;

    let mut commands = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = string_field(entry, "name")?;
        let summary = entry
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        let mut args = Vec::new();
        let mut seen_optional = false;
        for arg in entry.get("args").and_then(Value::as_array).into_iter().flatten() {
            let required = arg.get("required").and_then(Value::as_bool).unwrap_or(true);
            if required && seen_optional {
                return Err(format!("command '{name}' declares a required arg after an optional one").into());
            }
            seen_optional |= !required;
            args.push(Arg {
                name: string_field(arg, "name")?,
                required,
                multivalue: arg.get("multivalue").and_then(Value::as_bool).unwrap_or(false),
            });
        }

        let mut options = Vec::new();
        for option in entry.get("options").and_then(Value::as_array).into_iter().flatten() {
            let default = option.get("default").cloned();
            if let Some(value) = &default {
                if !(value.is_boolean() || value.is_i64() || value.is_string()) {
                    return Err(format!(
                        "command '{name}' option default must be bool, integer or string: {value}"
                    )
                    .into());
                }
            }
            let option_name = string_field(option, "name")?;
            let required = option.get("required").and_then(Value::as_bool).unwrap_or(false);
            if required && default.is_some() {
                return Err(format!(
                    "command '{name}' option '{option_name}' is required but has a default"
                )
                .into());
            }
            if required && args.iter().any(|arg| arg.name == option_name) {
                return Err(format!(
                    "command '{name}' option '{option_name}' clashes with a positional argument"
                )
                .into());
            }
            options.push(Opt {
                name: option_name,
                required,
                default,
            });
        }

        commands.push(Command {
            name,
            summary,
            args,
            options,
        });
    }
    Ok(commands)
}

fn string_field(value: &Value, field: &str) -> Result<String, Box<dyn Error>> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| format!("schema entry is missing string field `{field}`: {value}").into())
}

fn render_registry(version: &str, commands: &[Command]) -> Result<String, Box<dyn Error>> {
    let mut out = String::new();
    writeln!(out, "const IPA_SCHEMA_VERSION: &str = {version:?};")?;
    writeln!(out)?;
    writeln!(out, "static IPA_COMMANDS: &[CommandDefinition] = &[")?;
    for command in commands {
        writeln!(out, "    CommandDefinition {{")?;
        writeln!(out, "        name: {:?},", command.name)?;
        writeln!(out, "        summary: {:?},", command.summary)?;
        writeln!(out, "        args: &[")?;
        for arg in &command.args {
            writeln!(
                out,
                "            ArgDefinition {{ name: {:?}, required: {}, multivalue: {} }},",
                arg.name, arg.required, arg.multivalue
            )?;
        }
        writeln!(out, "        ],")?;
        writeln!(out, "        options: &[")?;
        for option in &command.options {
            let default = match &option.default {
                None => "None".to_owned(),
                Some(Value::Bool(flag)) => format!("Some(DefaultValue::Bool({flag}))"),
                Some(Value::String(text)) => format!("Some(DefaultValue::Str({text:?}))"),
                Some(number) => format!("Some(DefaultValue::Int({number}))"),
            };
            writeln!(
                out,
                "            OptionDefinition {{ name: {:?}, required: {}, default: {default} }},",
                option.name, option.required
            )?;
        }
        writeln!(out, "        ],")?;
        writeln!(out, "    }},")?;
    }
    writeln!(out, "];")?;
    Ok(out)
}

fn render_methods(
    client: &str,
    is_async: bool,
    commands: &[Command],
) -> Result<String, Box<dyn Error>> {
    let (fn_kw, await_suffix) = if is_async {
        ("pub async fn", ".await")
    } else {
        ("pub fn", "")
    };

    let mut out = String::new();
    writeln!(out, "impl {client} {{")?;
    for command in commands {
        let summary = if command.summary.is_empty() {
            format!("Calls the `{}` command.", command.name)
        } else {
            command.summary.clone()
        };
        writeln!(out, "    #[doc = {summary:?}]")?;
        writeln!(out, "    #[doc = \"\"]")?;
        writeln!(
            out,
            "    #[doc = {:?}]",
            format!("Sends the `{}` command; see [`crate::marshal`] for how `params` is merged with the schema defaults.", command.name)
        )?;
        write!(out, "    {fn_kw} {}(\n        &self,\n", ident(&command.name))?;
        let required_options: Vec<&Opt> =
            command.options.iter().filter(|option| option.required).collect();
        // Required arguments and options come first, optional arguments last,
        // so every `Option` parameter trails the mandatory ones.
        for arg in command.args.iter().filter(|arg| arg.required) {
            writeln!(out, "        {}: impl Into<serde_json::Value>,", ident(&arg.name))?;
        }
        for option in &required_options {
            writeln!(out, "        {}: impl Into<serde_json::Value>,", ident(&option.name))?;
        }
        for arg in command.args.iter().filter(|arg| !arg.required) {
            writeln!(out, "        {}: Option<serde_json::Value>,", ident(&arg.name))?;
        }
        writeln!(out, "        params: crate::Params,")?;
        writeln!(
            out,
            "    ) -> Result<serde_json::Value, crate::ClientError> {{"
        )?;
        let args: Vec<String> = command
            .args
            .iter()
            .map(|arg| {
                if arg.required {
                    format!("Some({}.into())", ident(&arg.name))
                } else {
                    ident(&arg.name)
                }
            })
            .collect();
        let params: String = required_options
            .iter()
            .map(|option| format!(".with({:?}, {})", option.name, ident(&option.name)))
            .collect();
        writeln!(
            out,
            "        self.call_generated({:?}, vec![{}], params{params}){await_suffix}",
            command.name,
            args.join(", ")
        )?;
        writeln!(out, "    }}")?;
        writeln!(out)?;
    }
    writeln!(out, "}}")?;
    Ok(out)
}

fn ident(name: &str) -> String {
    if RUST_KEYWORDS.contains(&name) {
        format!("r#{name}")
    } else {
        name.to_owned()
    }
}
