//! Search users with the async client, limiting the result size.
//!
//! Run:
//! `IPA_HOST=ipa.example.test IPA_USER=admin IPA_PASSWORD=<password> cargo run --example async_user_find`
//!
//! Optional env vars:
//! - `IPA_SIZE_LIMIT` (defaults to `5`)

use freeipa_client::{IpaClient, Params};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (Ok(host), Ok(user), Ok(password)) = (
        std::env::var("IPA_HOST"),
        std::env::var("IPA_USER"),
        std::env::var("IPA_PASSWORD"),
    ) else {
        eprintln!("Set IPA_HOST, IPA_USER and IPA_PASSWORD before running this example.");
        std::process::exit(2);
    };
    let limit: u32 = std::env::var("IPA_SIZE_LIMIT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(5);

    let client = IpaClient::new(host)?;
    client.login(&user, &password).await?;

    let users = client
        .user_find(None, Params::new().with("sizelimit", limit))
        .await?;
    println!("{}", serde_json::to_string_pretty(&users)?);
    Ok(())
}
