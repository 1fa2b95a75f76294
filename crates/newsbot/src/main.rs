use std::sync::Arc;

use newsbot_core::config::Config;
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), newsbot_core::Error> {
    newsbot_core::logging::init("newsbot")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            error!("cannot start: {e}");
            return Err(e);
        }
    };

    newsbot_telegram::router::run_polling(cfg)
        .await
        .map_err(|e| newsbot_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}
