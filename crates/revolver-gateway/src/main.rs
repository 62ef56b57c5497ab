//! Revolver API Gateway Server
//!
//! Binary entry point: loads and validates configuration, assembles the
//! gateway, mounts every surface on an actix-web server and handles
//! graceful shutdown.

use revolver::config::dynamic::ConfigPoller;
use revolver::config::settings::load_settings;
use revolver::config::validation::ConfigValidator;
use revolver::gateway::Gateway;
use revolver::logs::logger::configure_logger;
use revolver::routes::{admin, health, ingress, mailbox, metadata};

use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    configure_logger();

    let settings = match load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "starting revolver gateway v{} ({} services)",
        env!("CARGO_PKG_VERSION"),
        settings.services.len()
    );

    let validation = ConfigValidator::validate_comprehensive(&settings);
    if !validation.is_valid() {
        error!("configuration validation failed:");
        for e in &validation.errors {
            error!("  - {}", e);
        }
        std::process::exit(1);
    }
    ConfigValidator::report(&validation);

    let grace = Duration::from_secs(settings.shutdown_grace_seconds);
    let gateway = match Gateway::builder(settings).build() {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            error!("failed to assemble gateway: {}", e);
            std::process::exit(1);
        }
    };

    let mut background = gateway.start_background();
    if let Some(poller) = ConfigPoller::from_gateway(Arc::clone(&gateway)) {
        background.push(poller.spawn());
    }

    let host = std::env::var("REVOLVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("REVOLVER_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(5900);
    info!("listening on {}:{}", host, port);

    let gateway_data = web::Data::from(Arc::clone(&gateway));
    let server = HttpServer::new(move || {
        App::new()
            .app_data(gateway_data.clone())
            .wrap(Logger::new(
                r#"%a "%r" %s %b "%{User-Agent}i" %T"#,
            ))
            .wrap(actix_web::middleware::Compress::default())
            .configure(health::configure_health)
            .configure(metadata::configure_metadata)
            .configure(admin::configure_admin)
            .configure(mailbox::configure_mailbox)
            .configure(ingress::configure_ingress)
    })
    .shutdown_timeout(grace.as_secs())
    .bind((host.as_str(), port))?
    .run();

    let handle = server.handle();
    tokio::select! {
        result = server => {
            match result {
                Ok(_) => info!("server stopped"),
                Err(e) => error!("server error: {}", e),
            }
        }
        _ = signal::ctrl_c() => {
            info!("shutdown signal received, draining for up to {}s", grace.as_secs());
            // Stop accepting, drain in-flight requests up to the grace
            // period, then fall through and stop the background machinery.
            handle.stop(true).await;
        }
    }

    // Pending callbacks stay CALLBACK_PENDING in the store; the rescuer
    // re-enqueues them on the next boot.
    for task in &background {
        task.abort();
    }
    futures::future::join_all(background).await;
    info!("shutdown complete");
    Ok(())
}
