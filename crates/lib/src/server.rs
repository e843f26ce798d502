//! Personality server process: MQTT ⇄ Ollama.

use crate::config::{self, Config, Personality};
use crate::llm::{ModelBackend, OllamaClient};
use crate::personality::SessionManager;
use crate::relay::{client_id, MqttConnection};
use crate::shutdown;
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Keep only the personality named `only` (case-insensitive), if given.
pub fn select_personalities(
    personalities: Vec<Personality>,
    only: Option<&str>,
) -> Result<Vec<Personality>> {
    let Some(name) = only else {
        return Ok(personalities);
    };
    let id = config::personality_id(name);
    let selected: Vec<Personality> = personalities.into_iter().filter(|p| p.id == id).collect();
    if selected.is_empty() {
        anyhow::bail!("personality {} is not configured", id);
    }
    Ok(selected)
}

/// Log a warning when the configured model is not available on the Ollama server.
async fn check_model(ollama: &OllamaClient, model: &str) {
    match ollama.list_models().await {
        Ok(models) if models.iter().any(|m| m.name == model) => {
            log::info!("ollama model {} available", model);
        }
        Ok(models) => {
            let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
            log::warn!(
                "ollama model {} not found at {} (available: {})",
                model,
                ollama.base_url(),
                names.join(", ")
            );
        }
        Err(e) => log::warn!("ollama model discovery failed: {}", e),
    }
}

/// Run the personality server until SIGINT/SIGTERM.
/// Publishes responses on the response broker and serves requests from the request broker.
pub async fn run_personality_server(
    config: Config,
    config_path: &Path,
    only: Option<&str>,
) -> Result<()> {
    let personalities =
        select_personalities(config::resolve_personalities(&config, config_path)?, only)?;
    let model = config::resolve_model(&config);
    let ollama = OllamaClient::new(config.model.base_url.clone());
    check_model(&ollama, &model).await;
    let backend: Arc<dyn ModelBackend> = Arc::new(ollama);

    let prefix = config.broker.client_id_prefix.as_str();
    let responder = MqttConnection::connect(
        &client_id(prefix, "personality-tx"),
        &config.broker.response,
        Vec::new(),
        None,
    )
    .await
    .context("connecting to response broker")?;

    let manager = Arc::new(SessionManager::new(
        &personalities,
        backend,
        &model,
        Arc::new(responder.publisher()),
    ));
    let listener = MqttConnection::connect(
        &client_id(prefix, "personality-rx"),
        &config.broker.request,
        manager.request_topics(),
        Some(manager.delivery_handler()),
    )
    .await
    .context("connecting to request broker")?;

    for p in &personalities {
        log::info!(
            "{} is online: listening on {}, replying on {}",
            p.id,
            p.request_topic(),
            p.response_topic()
        );
    }

    shutdown::shutdown_signal().await;
    log::info!("cleaning up personality connections");
    listener.shutdown().await;
    responder.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: &str) -> Personality {
        Personality {
            id: id.to_string(),
            prompt: String::new(),
        }
    }

    #[test]
    fn select_by_name_is_case_insensitive() {
        let selected = select_personalities(vec![p("ada"), p("bot")], Some("Ada")).unwrap();
        assert_eq!(selected, vec![p("ada")]);
        assert_eq!(select_personalities(vec![p("ada"), p("bot")], None).unwrap().len(), 2);
        assert!(select_personalities(vec![p("bot")], Some("zed")).is_err());
    }
}
