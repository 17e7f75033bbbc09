//! List the generated FreeIPA command catalog.
//!
//! Run:
//! `cargo run --example list_commands`

use freeipa_client::{BlockingIpaClient, ipa_api_version};

fn main() {
    println!("FreeIPA API version: {}", ipa_api_version());

    let commands = BlockingIpaClient::commands();
    println!("Loaded {} commands", commands.len());
    println!("First 20 commands:");

    for command in commands.iter().take(20) {
        let always_sent: Vec<_> = command
            .options
            .iter()
            .filter(|option| option.default.is_some())
            .map(|option| option.name)
            .collect();
        println!(
            "- {:<28} {} (always sends: {})",
            command.name,
            command.summary,
            always_sent.join(", ")
        );
    }
}
