//! Robots, custom robot requests, purchases, subscription pricing and the
//! read-only AI feeds. Every call is a direct REST round trip; nothing is
//! cached here.

mod model;

pub use model::*;

use serde::Serialize;

use super::http::{ApiError, HttpService};

#[derive(Clone)]
pub struct MarketplaceService {
    http: HttpService,
}

impl MarketplaceService {
    pub fn new(http: HttpService) -> Self {
        Self { http }
    }

    pub async fn robots(&self) -> Result<Vec<Robot>, ApiError> {
        self.http.get_json("/api/robots").await
    }

    pub async fn robot(&self, robot_id: &str) -> Result<Robot, ApiError> {
        self.http.get_json(&format!("/api/robots/{}", robot_id)).await
    }

    pub async fn create_robot(&self, draft: &RobotDraft) -> Result<Robot, ApiError> {
        self.http.post_json("/api/robots", draft).await
    }

    pub async fn update_robot(&self, robot_id: &str, draft: &RobotDraft) -> Result<Robot, ApiError> {
        self.http.put_json(&format!("/api/robots/{}", robot_id), draft).await
    }

    pub async fn delete_robot(&self, robot_id: &str) -> Result<(), ApiError> {
        info!("Deleting robot {}", robot_id);
        self.http.delete(&format!("/api/robots/{}", robot_id)).await
    }

    pub async fn robot_requests(&self) -> Result<Vec<RobotRequest>, ApiError> {
        self.http.get_json("/api/robot-requests").await
    }

    pub async fn create_robot_request(&self, request: &NewRobotRequest) -> Result<RobotRequest, ApiError> {
        self.http.post_json("/api/robot-requests", request).await
    }

    pub async fn update_robot_request_status(
        &self,
        request_id: &str,
        status: RequestStatus,
    ) -> Result<RobotRequest, ApiError> {
        #[derive(Serialize)]
        struct StatusUpdate {
            status: RequestStatus,
        }

        self.http
            .put_json(&format!("/api/robot-requests/{}", request_id), &StatusUpdate { status })
            .await
    }

    pub async fn purchases(&self) -> Result<Vec<Purchase>, ApiError> {
        self.http.get_json("/api/purchases").await
    }

    pub async fn create_purchase(&self, purchase: &NewPurchase) -> Result<Purchase, ApiError> {
        self.http.post_json("/api/purchases", purchase).await
    }

    pub async fn subscription_prices(&self) -> Result<Vec<SubscriptionPlan>, ApiError> {
        self.http.get_json("/api/subscription/prices").await
    }

    pub async fn update_subscription_price(
        &self,
        plan_id: &str,
        update: &PriceUpdate,
    ) -> Result<SubscriptionPlan, ApiError> {
        self.http
            .put_json(&format!("/api/subscription/prices/{}", plan_id), update)
            .await
    }

    pub async fn trading_signals(&self) -> Result<Vec<TradingSignal>, ApiError> {
        self.http.get_json("/api/ai/trading-signals").await
    }

    pub async fn market_analysis(&self) -> Result<Vec<MarketAnalysis>, ApiError> {
        self.http.get_json("/api/ai/market-analysis").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test::spawn_http_server;
    use std::time::Duration;

    async fn service_with(responses: Vec<(u16, &str)>) -> (MarketplaceService, crate::utils::test::FakeServer) {
        let server = spawn_http_server(responses.into_iter().map(|(s, b)| (s, b.to_string())).collect()).await;
        let http = HttpService::new(server.base_url.clone(), Duration::from_secs(5)).unwrap();
        (MarketplaceService::new(http), server)
    }

    #[tokio::test]
    async fn test_robot_listing_and_delete() {
        let (service, server) = service_with(vec![
            (
                200,
                r#"{"data":[{"_id":"r1","name":"Gold Scalper","price":149.99,"features":["XAUUSD","M5"]}]}"#,
            ),
            (204, ""),
        ])
        .await;

        let robots = service.robots().await.unwrap();
        assert_eq!(robots.len(), 1);
        assert_eq!(robots[0].id, "r1");
        assert_eq!(robots[0].features, vec!["XAUUSD", "M5"]);

        service.delete_robot("r1").await.unwrap();

        let requests = server.requests.lock().await;
        assert_eq!(requests[0].path, "/api/robots");
        assert_eq!(requests[1].method, "DELETE");
        assert_eq!(requests[1].path, "/api/robots/r1");
    }

    #[tokio::test]
    async fn test_request_status_update_body() {
        let (service, server) = service_with(vec![(
            200,
            r#"{"id":"q1","robotName":"Trend Rider","status":"in_progress"}"#,
        )])
        .await;

        let updated = service
            .update_robot_request_status("q1", RequestStatus::InProgress)
            .await
            .unwrap();
        assert_eq!(updated.status, RequestStatus::InProgress);

        let requests = server.requests.lock().await;
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].path, "/api/robot-requests/q1");
        assert_eq!(requests[0].body, r#"{"status":"in_progress"}"#);
    }

    #[test]
    fn test_signal_aliases() {
        let signal: TradingSignal = serde_json::from_str(
            r#"{"pair":"EURUSD","type":"BUY","entryPrice":1.0842,"stopLoss":1.081,"confidence":0.72}"#,
        )
        .unwrap();

        assert_eq!(signal.symbol, "EURUSD");
        assert_eq!(signal.direction, SignalDirection::Buy);
        assert_eq!(signal.take_profit, None);
    }

    #[test]
    fn test_draft_skips_empty_optionals() {
        let draft = RobotDraft {
            name: "Grid Master".to_string(),
            description: "Range grid".to_string(),
            price: 99.0,
            currency: None,
            category: None,
            features: vec![],
            image_url: None,
        };

        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name":"Grid Master","description":"Range grid","price":99.0,"features":[]})
        );
    }
}
