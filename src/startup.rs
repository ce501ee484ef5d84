use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AuthService, TokenSigner};
use crate::error::{AppError, ValidationError};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    get_current_user, health_check, login, logout, logout_all, refresh, set_user_status, sign_up,
};

pub fn run(
    listener: TcpListener,
    service: Arc<AuthService>,
    signer: Arc<TokenSigner>,
) -> Result<Server, std::io::Error> {
    let service = web::Data::from(service);

    let server = HttpServer::new(move || {
        // Malformed JSON bodies become validation errors
        let json_config = web::JsonConfig::default().error_handler(|err, _req| {
            AppError::from(ValidationError::InvalidFormat(format!("request body ({})", err))).into()
        });

        App::new()
            // Global middleware
            .wrap(Logger::default())      // Standard logging
            .wrap(LoggerMiddleware)       // Custom logging

            // Shared state
            .app_data(service.clone())
            .app_data(json_config)

            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/api/v1")
                    .service(
                        web::scope("/auth")
                            .route("/sign-up", web::post().to(sign_up))
                            .route("/login", web::post().to(login))
                            .route("/refresh", web::post().to(refresh))
                            .route("/logout", web::post().to(logout)),
                    )
                    // Protected routes (require JWT authentication)
                    .service(
                        web::scope("/me")
                            .wrap(JwtMiddleware::new(signer.clone()))
                            .route("", web::get().to(get_current_user))
                            .route("/logout-all", web::post().to(logout_all)),
                    )
                    .service(
                        web::scope("/users")
                            .wrap(JwtMiddleware::new(signer.clone()))
                            .route("/{id}/status", web::put().to(set_user_status)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
