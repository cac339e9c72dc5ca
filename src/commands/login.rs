use crate::auth::{LoginFlow, TerminalInteraction};
use crate::commands::token_store;
use crate::config::Config;
use crate::error::AppError;

pub async fn run(config: &Config, manual: bool) -> Result<String, AppError> {
    let store = token_store(config)?;
    LoginFlow::new(config, &store)?
        .run(manual, &TerminalInteraction)
        .await?;

    Ok(format!(
        "\nLogin successful!\nTokens saved to {}",
        store.path().display()
    ))
}
