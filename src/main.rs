use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use circulation::config::ServerOptions;
use circulation::{
    router, AppState, Circulation, InMemoryStorage, Principal, Role, StaticTokenVerifier,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("circulation=debug,tower_http=debug,info")
        }))
        .init();

    let options = ServerOptions::parse();

    let storage = InMemoryStorage::new();
    let circulation = Circulation::new(storage, options.circulation_config());

    // Demo principals; production deployments plug a real issuer into the
    // TokenVerifier seam instead.
    let verifier = StaticTokenVerifier::new();
    let admin = Principal {
        user_id: Uuid::new_v4(),
        role: Role::Admin,
    };
    let student = Principal {
        user_id: Uuid::new_v4(),
        role: Role::Student,
    };
    verifier.insert(options.admin_token.clone(), admin);
    verifier.insert(options.student_token.clone(), student);
    tracing::info!(admin_user = %admin.user_id, student_user = %student.user_id, "registered demo principals");

    let state = AppState {
        circulation,
        verifier: Arc::new(verifier),
    };

    let listener = tokio::net::TcpListener::bind(&options.bind).await?;
    tracing::info!(bind = %options.bind, "circulation server listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
