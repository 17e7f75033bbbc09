//! Create a user with the blocking client.
//!
//! Run:
//! `IPA_HOST=ipa.example.test IPA_USER=admin IPA_PASSWORD=<password> cargo run --example blocking_user_add -- jdoe`

use freeipa_client::{BlockingIpaClient, Params};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (Ok(host), Ok(user), Ok(password)) = (
        std::env::var("IPA_HOST"),
        std::env::var("IPA_USER"),
        std::env::var("IPA_PASSWORD"),
    ) else {
        eprintln!("Set IPA_HOST, IPA_USER and IPA_PASSWORD before running this example.");
        std::process::exit(2);
    };
    let uid = std::env::args().nth(1).unwrap_or_else(|| "jdoe".to_owned());

    let client = BlockingIpaClient::new(host)?;
    client.login(&user, &password)?;

    let created = client.user_add(
        uid.as_str(),
        "John",
        "Doe",
        Params::new().with("cn", "John Doe"),
    )?;
    println!("{}", serde_json::to_string_pretty(&created)?);

    client.logout()?;
    Ok(())
}
