use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Robot {
    #[serde(alias = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, alias = "image")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body for creating or replacing a robot listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotDraft {
    pub name: String,
    pub description: String,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    #[serde(alias = "in-progress", alias = "inProgress")]
    InProgress,
    Completed,
    #[serde(alias = "declined")]
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotRequest {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(alias = "botName")]
    pub robot_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub trading_pairs: Vec<String>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub budget: Option<f64>,
    pub status: RequestStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRobotRequest {
    pub robot_name: String,
    pub description: String,
    pub trading_pairs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "robot")]
    pub robot_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default, alias = "transactionId")]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPurchase {
    pub robot_id: String,
    pub amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPlan {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(alias = "plan")]
    pub name: String,
    pub price: f64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, alias = "interval")]
    pub billing_period: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalDirection {
    #[serde(alias = "BUY", alias = "Buy")]
    Buy,
    #[serde(alias = "SELL", alias = "Sell")]
    Sell,
    #[serde(alias = "HOLD", alias = "Hold")]
    Hold,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingSignal {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    #[serde(alias = "pair")]
    pub symbol: String,
    #[serde(alias = "type", alias = "action")]
    pub direction: SignalDirection,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub timeframe: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAnalysis {
    #[serde(alias = "pair")]
    pub symbol: String,
    #[serde(default)]
    pub trend: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub support: Option<f64>,
    #[serde(default)]
    pub resistance: Option<f64>,
    #[serde(default)]
    pub sentiment: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
}
