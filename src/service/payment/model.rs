use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Mpesa,
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Purchase,
    Subscription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum PaymentStatus {
    Idle,
    Processing,
    Success,
    Failed { reason: String },
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            PaymentStatus::Idle => "idle",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Success => "success",
            PaymentStatus::Failed { .. } => "failed",
        }
    }
}

/// One checkout attempt. Lives only as long as the flow that created it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub method: PaymentMethod,
    pub amount: f64,
    pub currency: String,
    pub item_id: String,
    pub payment_type: PaymentType,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl PaymentIntent {
    pub fn new(method: PaymentMethod, amount: f64, currency: &str, item_id: &str, payment_type: PaymentType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            method,
            amount,
            currency: currency.to_string(),
            item_id: item_id.to_string(),
            payment_type,
            transaction_id: None,
            status: PaymentStatus::Idle,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MpesaForm {
    pub phone: String,
    pub amount: f64,
    pub item_id: String,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone)]
pub struct CardForm {
    pub card_number: String,
    pub expiry: String,
    pub cvv: String,
    pub holder_name: String,
    pub amount: f64,
    pub currency: String,
    pub item_id: String,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MpesaRequest {
    pub phone_number: String,
    pub amount: f64,
    pub currency: String,
    pub item_id: String,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRequest {
    pub card_number: String,
    pub expiry_month: String,
    pub expiry_year: String,
    pub cvv: String,
    pub cardholder_name: String,
    pub amount: f64,
    pub currency: String,
    pub item_id: String,
    pub payment_type: PaymentType,
}

#[derive(Debug, Clone)]
pub enum PaymentRequest {
    Mpesa(MpesaRequest),
    Card(CardRequest),
}

impl PaymentRequest {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentRequest::Mpesa(_) => PaymentMethod::Mpesa,
            PaymentRequest::Card(_) => PaymentMethod::Card,
        }
    }
}

/// Reference the backend hands back for later verification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initiation {
    #[serde(alias = "checkoutRequestId", alias = "CheckoutRequestID", alias = "transactionId")]
    pub reference: String,
    #[serde(default, alias = "CustomerMessage")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "VerificationWire")]
pub enum Verification {
    Success,
    Pending,
    Failed(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerificationWire {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "ResultCode")]
    result_code: Option<serde_json::Value>,
    #[serde(default, alias = "ResultDesc")]
    message: Option<String>,
}

impl From<VerificationWire> for Verification {
    fn from(wire: VerificationWire) -> Self {
        let reason = || wire.message.clone().unwrap_or_else(|| "Payment failed".to_string());

        if let Some(status) = wire.status.as_deref() {
            return match status.to_ascii_lowercase().as_str() {
                "success" | "completed" | "paid" => Verification::Success,
                "failed" | "cancelled" | "canceled" | "declined" => Verification::Failed(reason()),
                _ => Verification::Pending,
            };
        }

        // Daraja STK query: "0" is paid, anything else is final
        if let Some(code) = wire.result_code.as_ref() {
            let code = match code {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return if code == "0" {
                Verification::Success
            } else {
                Verification::Failed(reason())
            };
        }

        match wire.success {
            Some(true) => Verification::Success,
            _ => Verification::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaymentOutcome {
    pub intent: PaymentIntent,
    pub attempts: u32,
}
