use std::collections::BTreeSet;

use serde_json::{Map, Value};
use tracing::debug;

use crate::ClientError;

/// Metadata for one FreeIPA command.
///
/// Values are generated from `schema/commands.json` at build time.
#[derive(Clone, Copy, Debug)]
pub struct CommandDefinition {
    /// Server-side command name (for example `user_add`).
    pub name: &'static str,
    /// One-line description of the command.
    pub summary: &'static str,
    /// Positional arguments in declaration order.
    pub args: &'static [ArgDefinition],
    /// Named options the command declares.
    pub options: &'static [OptionDefinition],
}

impl CommandDefinition {
    /// Looks up a declared option by name.
    pub fn option(&self, name: &str) -> Option<&'static OptionDefinition> {
        self.options.iter().find(|option| option.name == name)
    }
}

/// A positional argument of a command.
#[derive(Clone, Copy, Debug)]
pub struct ArgDefinition {
    pub name: &'static str,
    pub required: bool,
    /// Whether the server accepts a list for this argument.
    pub multivalue: bool,
}

/// A named option of a command.
#[derive(Clone, Copy, Debug)]
pub struct OptionDefinition {
    pub name: &'static str,
    /// The command cannot run without this option.
    pub required: bool,
    /// When set, the option is always transmitted, with this value unless the
    /// caller overrides it.
    pub default: Option<DefaultValue>,
}

/// Schema default of an always-transmitted option.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    Str(&'static str),
}

impl DefaultValue {
    pub fn to_value(self) -> Value {
        match self {
            Self::Bool(flag) => Value::Bool(flag),
            Self::Int(number) => Value::from(number),
            Self::Str(text) => Value::from(text),
        }
    }
}

// Generated file contract (`$OUT_DIR/ipa_commands.rs`):
// 1. `IPA_SCHEMA_VERSION: &str`
//    - API version the schema was exported for (`version` in `schema/commands.json`).
// 2. `IPA_COMMANDS: &[CommandDefinition]`
//    - One entry per command, sorted by `name`, with its `args` and `options`.
//
// This contract is produced by `build.rs` and consumed by this module via `include!`.
include!(concat!(env!("OUT_DIR"), "/ipa_commands.rs"));

/// Returns the FreeIPA API version the command catalog was generated for.
///
/// Clients send this as the `version` parameter unless configured otherwise.
pub fn ipa_api_version() -> &'static str {
    IPA_SCHEMA_VERSION
}

/// Returns every command in the generated catalog, sorted by name.
pub fn commands() -> &'static [CommandDefinition] {
    IPA_COMMANDS
}

/// Finds a command in the generated catalog.
pub fn find_command(name: &str) -> Result<&'static CommandDefinition, ClientError> {
    IPA_COMMANDS
        .binary_search_by(|command| command.name.cmp(name))
        .map(|index| &IPA_COMMANDS[index])
        .map_err(|_| ClientError::UnknownCommand(name.to_owned()))
}

/// Named parameters for a command call.
///
/// Holds both options the command declares and any extra keys the caller wants
/// to forward as-is. A `null` value for a declared option means "not supplied",
/// unless the key was added with [`Params::with_verbatim`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
    verbatim: BTreeSet<String>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing any previous value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Adds a parameter only when `value` is `Some`.
    #[must_use]
    pub fn with_opt<V: Into<Value>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    /// Adds a parameter that is sent exactly as given, `null` included.
    ///
    /// It replaces the schema default of a declared option and counts as
    /// supplying a required one.
    #[must_use]
    pub fn with_verbatim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        self.values.insert(key.clone(), value.into());
        self.verbatim.insert(key);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.verbatim.remove(&key);
        self.values.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.values
    }
}

impl From<Map<String, Value>> for Params {
    fn from(values: Map<String, Value>) -> Self {
        Self {
            values,
            verbatim: BTreeSet::new(),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect::<Map<String, Value>>()
            .into()
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = serde_json::map::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

/// A marshaled command: the method name, positional arguments and named
/// parameters, ready to be wrapped in a JSON-RPC envelope.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcCall {
    pub method: String,
    pub args: Vec<Value>,
    pub params: Map<String, Value>,
}

/// Packs caller arguments into an [`RpcCall`] following the command schema.
///
/// - Positional values are forwarded in declaration order. Absent trailing
///   optional arguments are dropped; an absent optional argument followed by a
///   present one is sent as `null`.
/// - Options with a schema default are always sent.
/// - Declared options supplied by the caller are sent unless `null`.
/// - Undeclared keys, and keys added with [`Params::with_verbatim`], are
///   forwarded as given and override anything computed.
/// - A required option that ends up absent is a
///   [`ClientError::MissingArgument`].
pub fn marshal(
    command: &CommandDefinition,
    args: Vec<Option<Value>>,
    params: Params,
) -> Result<RpcCall, ClientError> {
    if args.len() > command.args.len() {
        return Err(ClientError::TooManyArguments {
            command: command.name.to_owned(),
            expected: command.args.len(),
            given: args.len(),
        });
    }

    let mut supplied = args.into_iter();
    let mut positional = Vec::with_capacity(command.args.len());
    for arg in command.args {
        match supplied.next().flatten().filter(|value| !value.is_null()) {
            Some(value) => positional.push(value),
            None if arg.required => {
                return Err(ClientError::MissingArgument {
                    command: command.name.to_owned(),
                    argument: arg.name.to_owned(),
                });
            }
            None => positional.push(Value::Null),
        }
    }
    while positional.last().is_some_and(Value::is_null) {
        positional.pop();
    }

    let mut merged: Map<String, Value> = command
        .options
        .iter()
        .filter_map(|option| Some((option.name.to_owned(), option.default?.to_value())))
        .collect();

    let Params { values, verbatim } = params;
    let mut extras = Vec::new();
    for (key, value) in values {
        let declared = command.option(&key).is_some();
        if declared && !verbatim.contains(&key) {
            if !value.is_null() {
                merged.insert(key, value);
            }
        } else {
            if !declared {
                debug!(command = command.name, option = %key, "forwarding undeclared option");
            }
            extras.push((key, value));
        }
    }
    merged.extend(extras);

    if let Some(option) = command
        .options
        .iter()
        .find(|option| option.required && !merged.contains_key(option.name))
    {
        return Err(ClientError::MissingArgument {
            command: command.name.to_owned(),
            argument: option.name.to_owned(),
        });
    }

    Ok(RpcCall {
        method: command.name.to_owned(),
        args: positional,
        params: merged,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::{Params, commands, find_command, ipa_api_version, marshal};
    use crate::ClientError;

    fn params_of(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().expect("object literal").clone()
    }

    #[test]
    fn catalog_is_sorted_and_non_empty() {
        let catalog = commands();
        assert!(!catalog.is_empty());
        assert!(catalog.windows(2).all(|pair| pair[0].name < pair[1].name));
        assert_eq!(ipa_api_version(), "2.235");
    }

    #[test]
    fn catalog_covers_every_command_family() {
        assert!(commands().len() > 400, "catalog has {} commands", commands().len());
        for name in [
            "automember_add",
            "automountkey_add",
            "ca_add",
            "caacl_add_profile",
            "certprofile_import",
            "dnsforwardzone_add",
            "hbacsvc_add",
            "idoverrideuser_add",
            "idrange_add",
            "idview_apply",
            "krbtpolicy_mod",
            "netgroup_add_member",
            "otptoken_del",
            "permission_add",
            "pwpolicy_mod",
            "role_show",
            "selinuxusermap_add",
            "service_mod",
            "stageuser_find",
            "sudocmdgroup_add_member",
            "topologysegment_add",
            "trust_add",
            "user_add_cert",
            "user_remove_principal",
            "vault_add",
        ] {
            assert!(find_command(name).is_ok(), "{name} is missing from the catalog");
        }
    }

    #[test]
    fn schema_marks_required_options() {
        let command = find_command("user_add").expect("user_add exists");
        let required: Vec<_> = command
            .options
            .iter()
            .filter(|option| option.required)
            .map(|option| option.name)
            .collect();
        assert_eq!(required, vec!["givenname", "sn"]);
        assert!(command.options.iter().all(|option| !(option.required && option.default.is_some())));
    }

    #[test]
    fn find_command_reports_unknown_names() {
        assert!(find_command("user_add").is_ok());
        match find_command("user_frobnicate") {
            Err(ClientError::UnknownCommand(name)) => assert_eq!(name, "user_frobnicate"),
            other => panic!("unexpected lookup result: {other:?}"),
        }
    }

    #[test]
    fn user_add_sends_supplied_options_and_schema_defaults() {
        let command = find_command("user_add").expect("user_add exists");
        let call = marshal(
            command,
            vec![Some(json!("jdoe"))],
            Params::new()
                .with("givenname", "John")
                .with("sn", "Doe")
                .with("cn", "John Doe"),
        )
        .expect("marshals");

        assert_eq!(call.method, "user_add");
        assert_eq!(call.args, vec![json!("jdoe")]);
        assert_eq!(
            call.params,
            params_of(json!({
                "givenname": "John",
                "sn": "Doe",
                "cn": "John Doe",
                "noprivate": false,
                "all": true,
                "raw": false,
                "no_members": false,
            }))
        );
    }

    #[test]
    fn null_declared_option_is_omitted() {
        let command = find_command("user_add").expect("user_add exists");
        let call = marshal(
            command,
            vec![Some(json!("jdoe"))],
            Params::new()
                .with("givenname", "John")
                .with("sn", "Doe")
                .with("mail", Value::Null)
                .with_opt("title", None::<&str>),
        )
        .expect("marshals");

        assert!(!call.params.contains_key("mail"));
        assert!(!call.params.contains_key("title"));
    }

    #[test]
    fn null_does_not_clear_a_schema_default() {
        let command = find_command("user_show").expect("user_show exists");
        let call = marshal(
            command,
            vec![Some(json!("jdoe"))],
            Params::new().with("all", Value::Null),
        )
        .expect("marshals");

        assert_eq!(call.params.get("all"), Some(&json!(true)));
    }

    #[test]
    fn verbatim_null_replaces_a_schema_default() {
        let command = find_command("user_show").expect("user_show exists");
        let call = marshal(
            command,
            vec![Some(json!("jdoe"))],
            Params::new()
                .with_verbatim("all", Value::Null)
                .with_verbatim("rights", true),
        )
        .expect("marshals");

        assert_eq!(call.params.get("all"), Some(&Value::Null));
        assert_eq!(call.params.get("rights"), Some(&json!(true)));
        assert_eq!(call.params.get("raw"), Some(&json!(false)));
    }

    #[test]
    fn plain_insert_drops_verbatim_marking() {
        let params = Params::new()
            .with_verbatim("all", Value::Null)
            .with("all", Value::Null);
        let command = find_command("user_show").expect("user_show exists");
        let call = marshal(command, vec![Some(json!("jdoe"))], params).expect("marshals");
        assert_eq!(call.params.get("all"), Some(&json!(true)));
    }

    #[test]
    fn caller_values_override_defaults_and_extras_pass_through() {
        let command = find_command("user_find").expect("user_find exists");
        let call = marshal(
            command,
            vec![],
            Params::new()
                .with("all", false)
                .with("future_flag", json!(["a", "b"]))
                .with("experimental", Value::Null),
        )
        .expect("marshals");

        assert!(call.args.is_empty());
        assert_eq!(call.params.get("all"), Some(&json!(false)));
        assert_eq!(call.params.get("no_members"), Some(&json!(true)));
        assert_eq!(call.params.get("future_flag"), Some(&json!(["a", "b"])));
        assert_eq!(call.params.get("experimental"), Some(&Value::Null));
    }

    #[test]
    fn positional_args_keep_declaration_order() {
        let command = find_command("dnsrecord_find").expect("dnsrecord_find exists");
        let call = marshal(
            command,
            vec![Some(json!("example.test")), Some(json!("www"))],
            Params::new(),
        )
        .expect("marshals");
        assert_eq!(call.args, vec![json!("example.test"), json!("www")]);

        let call = marshal(command, vec![Some(json!("example.test")), None], Params::new())
            .expect("marshals");
        assert_eq!(call.args, vec![json!("example.test")]);
    }

    #[test]
    fn missing_required_argument_is_rejected() {
        let command = find_command("dnsrecord_add").expect("dnsrecord_add exists");
        let error = marshal(command, vec![Some(json!("example.test"))], Params::new())
            .expect_err("second argument is required");
        match error {
            ClientError::MissingArgument { command, argument } => {
                assert_eq!(command, "dnsrecord_add");
                assert_eq!(argument, "idnsname");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_required_option_is_rejected() {
        let command = find_command("user_add").expect("user_add exists");
        let error = marshal(command, vec![Some(json!("jdoe"))], Params::new())
            .expect_err("givenname and sn are required");
        match error {
            ClientError::MissingArgument { command, argument } => {
                assert_eq!(command, "user_add");
                assert_eq!(argument, "givenname");
            }
            other => panic!("unexpected error: {other}"),
        }

        let error = marshal(
            command,
            vec![Some(json!("jdoe"))],
            Params::new().with("givenname", "John").with("sn", Value::Null),
        )
        .expect_err("null does not supply a required option");
        assert!(matches!(
            error,
            ClientError::MissingArgument { ref argument, .. } if argument == "sn"
        ));
    }

    #[test]
    fn too_many_arguments_are_rejected() {
        let command = find_command("ping").expect("ping exists");
        let error = marshal(command, vec![Some(json!("extra"))], Params::new())
            .expect_err("ping takes no arguments");
        assert!(matches!(
            error,
            ClientError::TooManyArguments {
                expected: 0,
                given: 1,
                ..
            }
        ));
    }
}
