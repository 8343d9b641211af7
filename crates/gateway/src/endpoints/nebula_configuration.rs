//! # GET /.well-known/nebula-configuration
//!
//! クライアントがログインフローを開始するための公開設定。

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use certgate_types::NebulaConfiguration;

use crate::config::GatewayState;

/// GET /.well-known/nebula-configuration: OIDC設定の公開。
pub async fn handle_nebula_configuration(
    State(state): State<Arc<GatewayState>>,
) -> Json<NebulaConfiguration> {
    Json(state.nebula_configuration.clone())
}
