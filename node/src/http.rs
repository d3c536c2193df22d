//! Read-only HTTP surface: health, metrics, accounts, game history and matches.

use crate::metrics;
use arbuz_execution::{journal, ledger, LedgerError, PvpError, State};
use arbuz_types::{storage::MAX_USER_GAMES, Account, Amount, UserId};
use axum::{
    body::Body,
    extract::{Path, Query, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use prometheus_client::registry::Registry;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tracing::{error, info};

const DEFAULT_GAMES_LIMIT: usize = 10;

pub struct Api<S: State> {
    pub store: Arc<Mutex<S>>,
    pub registry: Arc<Registry>,
    pub metrics_auth_token: Option<String>,
}

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Serialize)]
struct AccountView {
    #[serde(flatten)]
    account: Account,
    withdrawable: Amount,
}

#[derive(Deserialize)]
struct GamesQuery {
    limit: Option<usize>,
}

pub fn router<S: State + 'static>(api: Arc<Api<S>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler::<S>))
        .route("/users/:id", get(account_handler::<S>))
        .route("/users/:id/games", get(games_handler::<S>))
        .route("/matches/:link", get(match_handler::<S>))
        .with_state(api)
}

pub async fn serve(addr: SocketAddr, app: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

fn authorize_metrics(headers: &HeaderMap, token: Option<&str>) -> Result<(), StatusCode> {
    if let Some(token) = token {
        let bearer = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        let header_token = headers
            .get("x-metrics-token")
            .and_then(|value| value.to_str().ok());

        if bearer != Some(token) && header_token != Some(token) {
            return Err(StatusCode::UNAUTHORIZED);
        }
    }
    Ok(())
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { ok: true })
}

async fn metrics_handler<S: State + 'static>(
    AxumState(api): AxumState<Arc<Api<S>>>,
    headers: HeaderMap,
) -> Result<Response<Body>, StatusCode> {
    authorize_metrics(&headers, api.metrics_auth_token.as_deref())?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(metrics::render(&api.registry)))
        .map_err(|err| {
            error!("metrics response build failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

fn ledger_status(err: LedgerError) -> StatusCode {
    match err {
        LedgerError::UnknownAccount(_) => StatusCode::NOT_FOUND,
        err => {
            error!(?err, "account read failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn account_handler<S: State + 'static>(
    AxumState(api): AxumState<Arc<Api<S>>>,
    Path(user): Path<UserId>,
) -> Response {
    let store = api.store.lock().await;
    match ledger::account(&*store, user).await {
        Ok(account) => Json(AccountView {
            withdrawable: account.withdrawable(),
            account,
        })
        .into_response(),
        Err(err) => ledger_status(err).into_response(),
    }
}

async fn games_handler<S: State + 'static>(
    AxumState(api): AxumState<Arc<Api<S>>>,
    Path(user): Path<UserId>,
    Query(query): Query<GamesQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_GAMES_LIMIT)
        .clamp(1, MAX_USER_GAMES);
    let store = api.store.lock().await;
    if let Err(err) = ledger::account(&*store, user).await {
        return ledger_status(err).into_response();
    }
    match journal::recent(&*store, user, limit).await {
        Ok(games) => Json(games).into_response(),
        Err(err) => {
            error!(user, ?err, "journal read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn match_handler<S: State + 'static>(
    AxumState(api): AxumState<Arc<Api<S>>>,
    Path(link): Path<String>,
) -> Response {
    let store = api.store.lock().await;
    match arbuz_execution::pvp::get_by_link(&*store, &link).await {
        Ok(m) => Json(m).into_response(),
        Err(PvpError::UnknownMatch(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(link, ?err, "match read failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use arbuz_execution::{pvp, Memory};
    use arbuz_types::{Currency, GameKind, GameRecord};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn api(token: Option<&str>) -> (Router, Arc<Mutex<Memory>>, Metrics) {
        let store = Arc::new(Mutex::new(Memory::default()));
        let mut registry = Registry::default();
        let metrics = Metrics::register(&mut registry);
        let api = Arc::new(Api {
            store: store.clone(),
            registry: Arc::new(registry),
            metrics_auth_token: token.map(str::to_string),
        });
        (router(api), store, metrics)
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let (app, _, _) = api(None).await;
        let (status, body) = get_body(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn metrics_require_token_when_configured() {
        let (app, _, metrics) = api(Some("secret")).await;
        metrics.games_settled.inc();

        let (status, _) = get_body(app.clone(), "/metrics").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&bytes).contains("games_settled_total 1"));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .header("x-metrics-token", "secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn account_view_includes_withdrawable() {
        let (app, store, _) = api(None).await;
        {
            let mut store = store.lock().await;
            ledger::register(&mut *store, 5, "bob", None).await.unwrap();
            ledger::update(&mut *store, 5, |account| {
                account.balance = Amount::from_cents(150);
                account.locked_balance = Amount::from_units(2);
                account.rollover_requirement = Amount::from_units(10);
                Ok(())
            })
            .await
            .unwrap();
        }
        let (status, body) = get_body(app.clone(), "/users/5").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["username"], "bob");
        assert_eq!(json["withdrawable"], "1.50");

        let (status, _) = get_body(app, "/users/6").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn games_are_newest_first_and_limited() {
        let (app, store, _) = api(None).await;
        {
            let mut store = store.lock().await;
            ledger::register(&mut *store, 5, "bob", None).await.unwrap();
            for result in 1..=3 {
                journal::append(
                    &mut *store,
                    GameRecord {
                        id: 0,
                        user_id: 5,
                        kind: GameKind::Dice,
                        bet_type: "even".into(),
                        stake: Amount::from_units(1),
                        result,
                        win: Amount::ZERO,
                        currency: Currency::Demo,
                        timestamp: 0,
                    },
                )
                .await
                .unwrap();
            }
        }
        let (status, body) = get_body(app, "/users/5/games?limit=2").await;
        assert_eq!(status, StatusCode::OK);
        let games: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(games.len(), 2);
        assert_eq!(games[0]["result"], 3);
        assert_eq!(games[1]["result"], 2);
    }

    #[tokio::test]
    async fn matches_by_link() {
        let (app, store, _) = api(None).await;
        {
            let mut store = store.lock().await;
            pvp::ensure(&mut *store, pvp::new_jackpot(0)).await.unwrap();
        }
        let (status, body) = get_body(app.clone(), &format!("/matches/{}", pvp::JACKPOT_LINK)).await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["id"], 100);
        assert_eq!(json["status"], "waiting");

        let (status, _) = get_body(app, "/matches/pvp_missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
