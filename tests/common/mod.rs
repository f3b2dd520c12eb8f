use std::sync::Arc;

use actix_http::HttpService;
use actix_http_test::{TestServer, test_server};
use actix_service::map_config;
use actix_web::dev::AppConfig;
use actix_web::web::{self, Data};
use actix_web::{App, middleware};

use wrist_edge::camera::StreamSessions;
use wrist_edge::delta::engine::DeltaEngine;
use wrist_edge::delta::event_log::{EventLog, spawn_ingest};
use wrist_edge::delta::sessions::SessionTable;
use wrist_edge::error::json_error_handler;
use wrist_edge::hub::memory::MemoryHub;
use wrist_edge::hub::{AuthService, CameraSource, EventBus, StateStore};
use wrist_edge::pairing::PairingService;
use wrist_edge::push_tokens::PushTokenStore;
use wrist_edge::{camera_api, internal_backstage, pairing_api, watch_api};

pub const TEST_TOKEN: &str = "test-watch-token";

pub struct TestEdge {
    pub srv: TestServer,
    pub hub: Arc<MemoryHub>,
    pub log: Arc<EventLog>,
    pub pairing: Arc<PairingService>,
    pub push_tokens: Data<PushTokenStore>,
    pub camera_sessions: Data<StreamSessions>,
}

pub async fn spawn_edge(event_buffer_size: usize) -> TestEdge {
    let hub = MemoryHub::new();
    hub.register_static_token(TEST_TOKEN);

    let log = Arc::new(EventLog::new(event_buffer_size));
    let _ingest = spawn_ingest(log.clone(), hub.subscribe());

    let sessions = Arc::new(SessionTable::new(chrono::Duration::seconds(300)));
    let states: Arc<dyn StateStore> = hub.clone();
    let auth: Arc<dyn AuthService> = hub.clone();
    let camera_source: Arc<dyn CameraSource> = hub.clone();

    let engine = Data::new(DeltaEngine::new(log.clone(), sessions, states.clone()));
    let pairing = Arc::new(PairingService::new(auth.clone()));
    let push_tokens = Data::new(PushTokenStore::new(None));
    let camera_sessions = Data::new(StreamSessions::new());
    let outer_camera_sessions = camera_sessions.clone();

    let srv_engine = engine.clone();
    let srv_pairing = pairing.clone();
    let srv_push_tokens = push_tokens.clone();

    let srv = test_server(move || {
        let engine = srv_engine.clone();
        let auth = auth.clone();
        let states = states.clone();
        let camera_source = camera_source.clone();
        let pairing = srv_pairing.clone();
        let push_tokens = srv_push_tokens.clone();
        let camera_sessions = camera_sessions.clone();

        HttpService::new(map_config(
            App::new()
                .app_data(web::JsonConfig::default().error_handler(json_error_handler))
                .app_data(engine)
                .app_data(Data::from(auth))
                .app_data(Data::from(states))
                .app_data(Data::from(camera_source))
                .app_data(Data::from(pairing))
                .app_data(push_tokens)
                .app_data(camera_sessions)
                .wrap(middleware::Compress::default())
                .service(
                    web::scope("/internal-backstage")
                        .configure(internal_backstage::configure_internal_backstage),
                )
                .service(
                    web::scope("/api")
                        .configure(watch_api::configure_watch_api)
                        .configure(pairing_api::configure_pairing_api)
                        .configure(camera_api::configure_camera_api),
                ),
            |_| AppConfig::default(),
        ))
        .tcp()
    })
    .await;

    TestEdge {
        srv,
        hub,
        log,
        pairing,
        push_tokens,
        camera_sessions: outer_camera_sessions,
    }
}
