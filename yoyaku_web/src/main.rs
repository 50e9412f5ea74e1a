mod error;
mod routes;

use std::{error::Error, net::SocketAddr, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use eventstore::{Client, ClientSettings};
use tracing::{error, info, Level};
use yoyaku::{
    domain::scheduling::{Collaborators, Repositories, SchedulingEngine},
    infrastructure::{
        core::{
            EventStoreActivityLogRepository, EventStoreBookingRepository,
            EventStoreServiceRepository,
        },
        memory::{
            InMemoryActivityLogRepository, InMemoryBookingRepository, InMemoryServiceRepository,
        },
    },
    YoyakuConfig,
};

#[tokio::main]
async fn main() {
    match YoyakuConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("アプリケーションエラー: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("アプリケーションエラー: {}", error)
        }
    }
}

fn repositories(config: &YoyakuConfig) -> Result<Repositories, Box<dyn Error>> {
    match &config.eventstore {
        Some(eventstore) => {
            let settings = eventstore.url.parse::<ClientSettings>()?;
            let client = Client::new(settings)?;
            info!("EventStoreDB に接続します");
            Ok(Repositories {
                services: Arc::new(EventStoreServiceRepository::new(client.clone())),
                bookings: Arc::new(EventStoreBookingRepository::new(client.clone())),
                activity: Arc::new(EventStoreActivityLogRepository::new(client)),
            })
        }
        None => {
            info!("インメモリのリポジトリで起動します");
            Ok(Repositories {
                services: Arc::new(InMemoryServiceRepository::default()),
                bookings: Arc::new(InMemoryBookingRepository::default()),
                activity: Arc::new(InMemoryActivityLogRepository::default()),
            })
        }
    }
}

async fn serve(config: &YoyakuConfig) -> Result<(), Box<dyn Error>> {
    let engine = SchedulingEngine::new(
        repositories(config)?,
        Collaborators::default(),
        &config.scheduling,
    );
    let app = routes::router(Arc::new(engine));
    let addr = config.web.bind.parse::<SocketAddr>()?;
    info!("{} で待ち受けます", addr);
    match &config.web.tls {
        Some(tls) => {
            let rustls = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            axum_server::bind_rustls(addr, rustls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await?;
        }
    }
    Ok(())
}
