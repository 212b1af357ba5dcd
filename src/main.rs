use pdprobe::callback::{CallbackCorrelator, serve};
use pdprobe::probe_engine::{PagerDutyClient, ProbeEngine};
use pdprobe::report::StdoutSink;
use pdprobe::runtime::spawn_scheduler;
use pdprobe::settings::{client_config, engine_config, load_from_cli};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> std::io::Result<()> {
    let settings = load_from_cli()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let client = PagerDutyClient::new(client_config(&settings));
    let engine = ProbeEngine::new(
        engine_config(&settings),
        Arc::new(client),
        Arc::new(StdoutSink),
    );
    let correlator = Arc::new(CallbackCorrelator::new(
        Arc::clone(&engine),
        settings.webhook_secret.clone(),
    ));

    info!(public_url = %settings.public_url, "webhook listener public url");
    let scheduler = spawn_scheduler(settings.schedule.clone(), {
        let engine = Arc::clone(&engine);
        move || {
            engine.spawn_probe();
        }
    });

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let served = runtime.block_on(serve(settings.listen, correlator, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    }));

    scheduler.stop();
    engine.shutdown();
    served
}
