use sqlx::postgres::PgPoolOptions;
use std::net::TcpListener;
use std::sync::Arc;

use authkeep::auth::roles::seed_default_roles;
use authkeep::auth::token_store::{InMemoryRefreshTokenStore, PgRefreshTokenStore, RefreshTokenStore};
use authkeep::auth::{AuthService, TokenSigner};
use authkeep::configuration::{get_configuration, Settings, StorageBackend};
use authkeep::startup::run;
use authkeep::telemetry::init_telemetry;
use authkeep::users::{InMemoryUserStore, PgUserStore, UserStore};

fn startup_error(kind: std::io::ErrorKind, message: &str) -> std::io::Error {
    std::io::Error::new(kind, message.to_string())
}

async fn build_stores(
    configuration: &Settings,
) -> std::io::Result<(Arc<dyn UserStore>, Arc<dyn RefreshTokenStore>)> {
    match configuration.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage; all accounts are lost on restart");
            let users: Arc<dyn UserStore> =
                Arc::new(InMemoryUserStore::new(configuration.sign_in.clone()));
            let tokens: Arc<dyn RefreshTokenStore> = Arc::new(InMemoryRefreshTokenStore::new());
            Ok((users, tokens))
        }
        StorageBackend::Postgres => {
            tracing::info!("Attempting to connect to database");
            let pool = PgPoolOptions::new()
                .max_connections(configuration.database.max_connections)
                .connect(&configuration.database.connection_string())
                .await
                .map_err(|e| {
                    tracing::error!("Failed to create connection pool: {}", e);
                    startup_error(std::io::ErrorKind::ConnectionRefused, "Database connection error")
                })?;

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to run migrations: {}", e);
                    startup_error(std::io::ErrorKind::Other, "Database migration error")
                })?;

            tracing::info!("Database connection pool created successfully");
            let users: Arc<dyn UserStore> =
                Arc::new(PgUserStore::new(pool.clone(), configuration.sign_in.clone()));
            let tokens: Arc<dyn RefreshTokenStore> = Arc::new(PgRefreshTokenStore::new(pool));
            Ok((users, tokens))
        }
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    init_telemetry();

    tracing::info!("Starting application");

    let configuration = match get_configuration() {
        Ok(config) => {
            tracing::info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            tracing::error!("Failed to read configuration: {}", e);
            return Err(startup_error(std::io::ErrorKind::InvalidInput, "Configuration error"));
        }
    };

    if let Err(e) = configuration.validate() {
        tracing::error!("Invalid configuration: {}", e);
        return Err(startup_error(std::io::ErrorKind::InvalidInput, "Configuration error"));
    }

    let signer = TokenSigner::new(&configuration.jwt).map_err(|e| {
        tracing::error!("Failed to build token signer: {}", e);
        startup_error(std::io::ErrorKind::InvalidInput, "Configuration error")
    })?;
    let signer = Arc::new(signer);

    let (users, token_store) = build_stores(&configuration).await?;

    seed_default_roles(users.as_ref()).await.map_err(|e| {
        tracing::error!("Failed to seed default roles: {}", e);
        startup_error(std::io::ErrorKind::Other, "Role seeding error")
    })?;

    let service = Arc::new(AuthService::new(
        users,
        token_store,
        signer.clone(),
        configuration.sign_in.clone(),
    ));

    let address = format!(
        "{}:{}",
        configuration.application.host, configuration.application.port
    );
    tracing::info!("Binding server to address: {}", address);

    let listener = TcpListener::bind(&address)?;
    tracing::info!("Server listening on: {}", address);

    run(listener, service, signer)?.await
}
