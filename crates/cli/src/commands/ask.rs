//! `simguide ask`: One question through intent routing, cache and upstream.

use simguide_assistant::{ChatRequest, RequestCoordinator};
use simguide_core::{SessionId, Style};

pub async fn run(
    message: String,
    style: Option<Style>,
    session: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_with_key()?;
    let client = simguide_providers::build_from_config(&config)?;
    let coordinator = RequestCoordinator::from_config(&config, client);

    let request = ChatRequest {
        message,
        style,
        session_id: session.as_deref().map(SessionId::from),
    };

    let reply = coordinator.handle(request).await?;
    println!("{}", reply.response);
    tracing::debug!(cached = reply.cached, "Answer delivered");

    Ok(())
}
