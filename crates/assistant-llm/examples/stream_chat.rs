//! Streams one reply to stdout.
//!
//! ```text
//! cargo run -p assistant-llm --example stream_chat -- anthropic "How much water should I drink?"
//! ```
//!
//! Reads credentials and overrides from the environment (and `.env` when present).

use std::io::Write as _;

use assistant_llm::init_observability;
use assistant_llm::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_observability();

    let mut args = std::env::args().skip(1);
    let provider: ProviderKind = args
        .next()
        .as_deref()
        .unwrap_or("openai")
        .parse()?;
    let prompt = args
        .next()
        .unwrap_or_else(|| "Give me one tip for better sleep.".to_string());

    let assistant = Assistant::builder()
        .config(AssistantConfig::from_env())
        .build()?;
    if !assistant.is_configured(provider) {
        eprintln!(
            "{} is not configured; configured providers: {:?}",
            provider.display_name(),
            assistant.configured_providers()
        );
        return Ok(());
    }

    let mut conversation = assistant
        .create_conversation("demo-user", provider)
        .await?;
    let cancel = conversation.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let mut updates = conversation.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while updates.changed().await.is_ok() {
            let partial = updates.borrow_and_update().partial_text.clone();
            if partial.len() > printed && partial.is_char_boundary(printed) {
                print!("{}", &partial[printed..]);
                let _ = std::io::stdout().flush();
            }
            printed = partial.len();
        }
    });

    let result = conversation.send_message(&prompt).await;
    drop(conversation);
    let _ = printer.await;
    println!();

    match result {
        Ok(reply) => println!("[{} chars from {}]", reply.chars().count(), provider.display_name()),
        Err(err) => eprintln!("error: {}", err.user_message()),
    }
    Ok(())
}
