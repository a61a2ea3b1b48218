use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chanlog::bot::Responder;
use chanlog::config::Config;
use chanlog::fics::session::Session;
use chanlog::ring;
use chanlog::sink::Dispatcher;
use chanlog::store::StoreBackend;
use chanlog::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    info!(fics = %config.session.addr, web = %config.web_addr, "chanlog starting");

    let store = Arc::new(
        StoreBackend::connect(
            config.store_url.as_deref(),
            &config.store_index,
            config.memory_capacity,
        )
        .await?,
    );
    let (writer, reader) = ring::channel(config.ring_capacity);
    let shutdown = CancellationToken::new();

    let state = AppState {
        ring: reader,
        store: Arc::clone(&store),
        stream: config.stream,
    };
    let app = web::build_router(state, &config.static_dir);
    let listener = TcpListener::bind(config.web_addr).await?;
    let web_task = tokio::spawn(web::serve(listener, app, shutdown.clone()));

    let session = match Session::establish(&config.session).await {
        Ok(session) => session,
        Err(e) => {
            shutdown.cancel();
            let _ = web_task.await;
            return Err(e.into());
        }
    };
    let responder = Responder::new(session.username(), &config.ignore);
    let mut sink = Dispatcher::new(store, writer, responder);

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "cannot listen for interrupts"),
        }
    });

    let result = session.run(&mut sink, shutdown.clone()).await;
    if let Err(e) = &result {
        warn!(error = %e, "session ended");
    }
    shutdown.cancel();
    match web_task.await {
        Ok(Err(e)) => warn!(error = %e, "web gateway failed"),
        Err(e) => warn!(error = %e, "web gateway task panicked"),
        Ok(Ok(())) => {}
    }
    result.map_err(Into::into)
}
