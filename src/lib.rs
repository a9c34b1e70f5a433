use std::sync::Arc;

use axum::{middleware, routing::get, Router};

pub mod config;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod network_client;

use domain::probe::ProbeEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: ProbeEngine,
    pub metrics_path: Arc<str>,
}

impl AppState {
    pub fn new(engine: ProbeEngine, metrics_path: String) -> Self {
        Self {
            engine,
            metrics_path: Arc::<str>::from(metrics_path),
        }
    }
}

/// The metrics route wins when it collides with `/` or `/health`.
pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.metrics_path.to_string();
    let mut router: Router<AppState> = Router::new().route(&metrics_path, get(http::handlers::metrics));

    if metrics_path != "/health" {
        router = router.route("/health", get(http::handlers::health));
    }
    if metrics_path != "/" {
        router = router.route("/", get(http::handlers::landing));
    }

    router
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::{
        net::{IpAddr, SocketAddr},
        sync::Arc,
        time::Duration,
    };

    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::{
        domain::item::{Item, SchemePolicy},
        errors::ResolveError,
        network_client::{Prober, Resolver},
    };

    use super::*;

    struct MockResolver;

    #[async_trait::async_trait]
    impl Resolver for MockResolver {
        async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, ResolveError> {
            match host {
                "web.internal" => Ok(vec![
                    "10.0.0.1".parse().expect("ip"),
                    "10.0.0.2".parse().expect("ip"),
                ]),
                "10.0.0.9" => Ok(vec!["10.0.0.9".parse().expect("ip")]),
                _ => Err(ResolveError::ResolutionFailed {
                    host: host.to_string(),
                    reason: "NXDOMAIN".to_string(),
                }),
            }
        }
    }

    struct MockProber;

    #[async_trait::async_trait]
    impl Prober for MockProber {
        async fn probe(&self, target: SocketAddr, _timeout: Duration) -> bool {
            target.ip() == "10.0.0.1".parse::<IpAddr>().expect("ip")
        }
    }

    struct PanickingProber;

    #[async_trait::async_trait]
    impl Prober for PanickingProber {
        async fn probe(&self, _target: SocketAddr, _timeout: Duration) -> bool {
            panic!("probe blew up")
        }
    }

    fn items() -> Vec<Item> {
        ["web.internal:443", "tcp://10.0.0.9:22", "gone.internal:80"]
            .into_iter()
            .map(|resource| {
                Item::parse(resource, SchemePolicy::Lenient)
                    .expect("valid resource")
                    .with_group(Some("all".to_string()))
            })
            .collect()
    }

    fn app_with(metrics_path: &str, prober: Arc<dyn Prober>) -> Router {
        let engine = ProbeEngine::new(
            items(),
            Arc::new(MockResolver),
            prober,
            Duration::from_millis(100),
        );
        build_app(AppState::new(engine, metrics_path.to_string()))
    }

    fn app() -> Router {
        app_with("/metrics", Arc::new(MockProber))
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("GET")
            .body(Body::empty())
            .expect("request build")
    }

    async fn body_text(response: axum::response::Response) -> String {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        String::from_utf8(body.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(get_request("/health"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn landing_points_at_metrics() {
        let response = app()
            .oneshot(get_request("/"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("valid json response");
        assert_eq!(body_json["metrics_endpoint"], "/metrics");
        assert_eq!(body_json["items"], 3);
        assert_eq!(body_json["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn metrics_reports_each_item_and_address() {
        let response = app()
            .oneshot(get_request("/metrics"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            crate::metrics::CONTENT_TYPE
        );

        let text = body_text(response).await;
        assert!(text.contains(
            "tcp_port_available{resource=\"web.internal:443\",group=\"all\",alias=\"\",network=\"tcp\",port=\"443\",address=\"10.0.0.1\",ip_version=\"4\"} 1\n"
        ));
        assert!(text.contains("address=\"10.0.0.2\",ip_version=\"4\"} 0\n"));
        assert!(text.contains("resource=\"10.0.0.9:22\""));
        assert!(text.contains(
            "tcp_port_resolve_failed{resource=\"gone.internal:80\",group=\"all\",alias=\"\",host=\"gone.internal\"} 1\n"
        ));
        assert!(text.contains(
            "tcp_port_resolved_addresses{resource=\"web.internal:443\",group=\"all\",alias=\"\",host=\"web.internal\"} 2\n"
        ));
    }

    #[tokio::test]
    async fn custom_metrics_path_replaces_default() {
        let app = app_with("/probe", Arc::new(MockProber));

        let response = app
            .clone()
            .oneshot(get_request("/probe"))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get_request("/metrics"))
            .await
            .expect("request execution");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_at_root_shadows_landing() {
        let response = app_with("/", Arc::new(MockProber))
            .oneshot(get_request("/"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("# TYPE tcp_port_available gauge"));
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = app()
            .oneshot(get_request("/services"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn panicked_probe_is_internal_error() {
        let response = app_with("/metrics", Arc::new(PanickingProber))
            .oneshot(get_request("/metrics"))
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body_json: serde_json::Value =
            serde_json::from_str(&body_text(response).await).expect("valid json response");
        assert_eq!(body_json["code"], "internal_error");
    }
}
