use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Server;
use actix_web::web::{self, Data};
use actix_web::{App, HttpServer, middleware};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use wrist_edge::cli::{CliArgs, EdgeMode, LogFormat};
use wrist_edge::delta::engine::DeltaEngine;
use wrist_edge::delta::event_log::{EventLog, spawn_ingest};
use wrist_edge::delta::sessions::SessionTable;
use wrist_edge::error::{EdgeError, json_error_handler};
use wrist_edge::hub::memory::MemoryHub;
use wrist_edge::hub::{AuthService, CameraSource, EventBus, StateStore};
use wrist_edge::pairing::{PairingDefaults, PairingService, clamp_lifespan_days};
use wrist_edge::push_tokens::PushTokenStore;
use wrist_edge::types::EdgeResult;
use wrist_edge::{camera, camera_api, internal_backstage, openapi, pairing_api, watch_api};

const PAIRING_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct EdgeInfo {
    engine: Data<DeltaEngine>,
    auth: Arc<dyn AuthService>,
    states: Arc<dyn StateStore>,
    camera_source: Arc<dyn CameraSource>,
    pairing: Arc<PairingService>,
    push_tokens: Data<PushTokenStore>,
    camera_sessions: Data<camera::StreamSessions>,
}

fn setup_server(args: CliArgs, edge_info: &EdgeInfo) -> EdgeResult<Server> {
    let engine = edge_info.engine.clone();
    let auth = edge_info.auth.clone();
    let states = edge_info.states.clone();
    let camera_source = edge_info.camera_source.clone();
    let pairing = edge_info.pairing.clone();
    let push_tokens = edge_info.push_tokens.clone();
    let camera_sessions = edge_info.camera_sessions.clone();
    let http_args = args.http.clone();

    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .app_data(engine.clone())
            .app_data(Data::from(auth.clone()))
            .app_data(Data::from(states.clone()))
            .app_data(Data::from(camera_source.clone()))
            .app_data(Data::from(pairing.clone()))
            .app_data(push_tokens.clone())
            .app_data(camera_sessions.clone())
            .service(
                web::scope(&http_args.base_path)
                    .wrap(middleware::Compress::default())
                    .wrap(middleware::NormalizePath::default())
                    .service(
                        web::scope("/internal-backstage")
                            .configure(internal_backstage::configure_internal_backstage),
                    )
                    .service(
                        web::scope("/api")
                            .configure(watch_api::configure_watch_api)
                            .configure(pairing_api::configure_pairing_api)
                            .configure(camera_api::configure_camera_api),
                    )
                    .service(
                        SwaggerUi::new("/swagger-ui/{_:.*}")
                            .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
                    ),
            )
    })
    .bind(args.http.http_server_tuple())
    .map_err(|e| EdgeError::Internal(format!("Could not bind server: {e}")))?
    .workers(args.http.workers)
    .shutdown_timeout(5);
    Ok(server.run())
}

#[cfg(not(tarpaulin_include))]
#[actix_web::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = CliArgs::parse();
    if args.markdown_help {
        clap_markdown::print_help_markdown::<CliArgs>();
        return Ok(());
    }
    init_tracing(&args.log_format);
    run_server(args).await.map_err(|e| e.into())
}

fn init_tracing(format: &LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Plain => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().pretty().with_env_filter(filter).init(),
    }
}

async fn run_server(args: CliArgs) -> EdgeResult<()> {
    let EdgeMode::Offline(ref offline) = args.mode;

    let hub = MemoryHub::new();
    for token in &offline.tokens {
        hub.register_static_token(token);
    }
    if let Some(states_file) = &offline.states_file {
        let seeded = hub.seed_from_file(states_file).await?;
        info!("Seeded {seeded} entity states from {}", states_file.display());
    }

    let log = Arc::new(EventLog::new(args.event_buffer_size));
    let _ingest_task = spawn_ingest(log.clone(), hub.subscribe());

    let sessions = Arc::new(SessionTable::new(chrono::Duration::seconds(
        args.session_ttl_seconds,
    )));
    let states: Arc<dyn StateStore> = hub.clone();
    let auth: Arc<dyn AuthService> = hub.clone();
    let camera_source: Arc<dyn CameraSource> = hub.clone();

    let engine = Data::new(DeltaEngine::new(log, sessions, states.clone()));

    let pairing = Arc::new(PairingService::new(auth.clone()));
    pairing.orphan_cleanup().await;
    configure_pairing_defaults(&args, &hub, &pairing);
    if args.pairing_on_startup {
        match pairing.refresh_active_default().await {
            Ok(Some(payload)) => {
                info!("Active pairing code ready, scan: {}", payload.pairing_uri)
            }
            Ok(None) => {
                error!("--pairing-on-startup needs --external-url or --internal-url; skipping")
            }
            Err(e) => error!("Could not create startup pairing code: {e}"),
        }
    }

    let push_tokens = Data::new(PushTokenStore::new(args.push_token_file.clone()));
    match push_tokens.load().await {
        Ok(count) if count > 0 => info!("Loaded {count} push tokens"),
        Ok(_) => {}
        Err(e) => error!("Could not load push tokens, starting empty: {e}"),
    }

    let edge_info = EdgeInfo {
        engine,
        auth,
        states,
        camera_source,
        pairing: pairing.clone(),
        push_tokens: push_tokens.clone(),
        camera_sessions: Data::new(camera::StreamSessions::new()),
    };
    let server = setup_server(args, &edge_info)?;

    tokio::select! {
        _ = server => {
            info!("Actix is shutting down. Revoking outstanding pairing codes");
            pairing.shutdown().await;
            if let Err(e) = push_tokens.flush().await {
                error!("Final push token flush failed: {e}");
            }
            info!("Actix was shutdown properly");
        },
        _ = pairing_sweep(pairing.clone()) => {
            info!("Pairing sweeper unexpectedly shut down");
        },
        _ = push_tokens.run_flush_loop() => {
            info!("Push token persister unexpectedly shut down");
        },
    }

    Ok(())
}

fn configure_pairing_defaults(args: &CliArgs, hub: &MemoryHub, pairing: &PairingService) {
    let base_url = args
        .external_url
        .clone()
        .or_else(|| args.internal_url.clone());
    let Some(base_url) = base_url else {
        return;
    };
    pairing.configure_defaults(PairingDefaults {
        user_id: hub.owner().id,
        base_url,
        local_url: args.internal_url.clone().unwrap_or_default(),
        remote_url: args.external_url.clone().unwrap_or_default(),
        lifespan_days: clamp_lifespan_days(args.pairing_lifespan_days),
    });
}

async fn pairing_sweep(pairing: Arc<PairingService>) {
    let mut interval = tokio::time::interval(PAIRING_SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        pairing.prune_expired().await;
    }
}
