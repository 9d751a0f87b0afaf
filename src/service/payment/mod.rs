mod error;
mod model;
mod poller;
pub mod validate;

pub use error::PaymentError;
pub use model::*;
pub use poller::{PaymentHandle, PollPolicy};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::config::PaymentConfig;

use super::http::{ApiError, HttpService};

const MPESA_CURRENCY: &str = "KES";

#[async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn initiate(&self, request: &PaymentRequest) -> Result<Initiation, ApiError>;
    async fn verify(&self, method: PaymentMethod, reference: &str) -> Result<Verification, ApiError>;
}

#[derive(Clone)]
pub struct RestPaymentGateway {
    http: HttpService,
}

impl RestPaymentGateway {
    pub fn new(http: HttpService) -> Self {
        Self { http }
    }
}

#[async_trait]
impl PaymentGateway for RestPaymentGateway {
    async fn initiate(&self, request: &PaymentRequest) -> Result<Initiation, ApiError> {
        match request {
            PaymentRequest::Mpesa(body) => self.http.post_json("/api/payments/mpesa/initiate", body).await,
            PaymentRequest::Card(body) => self.http.post_json("/api/payments/card/initiate", body).await,
        }
    }

    async fn verify(&self, method: PaymentMethod, reference: &str) -> Result<Verification, ApiError> {
        match method {
            PaymentMethod::Mpesa => {
                self.http
                    .post_json("/api/payments/mpesa/verify", &json!({ "checkoutRequestId": reference }))
                    .await
            }
            PaymentMethod::Card => {
                self.http
                    .post_json("/api/payments/card/verify", &json!({ "transactionId": reference }))
                    .await
            }
        }
    }
}

#[derive(Clone)]
pub struct PaymentService {
    gateway: Arc<dyn PaymentGateway>,
    config: PaymentConfig,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, config: PaymentConfig) -> Self {
        Self { gateway, config }
    }

    /// Validates, initiates an STK push, and starts polling for the result.
    pub async fn start_mpesa(&self, form: &MpesaForm) -> Result<PaymentHandle, PaymentError> {
        let phone = validate::validate_phone(&form.phone)?;
        validate::validate_amount(form.amount)?;
        validate::validate_item(&form.item_id)?;

        let intent = PaymentIntent::new(
            PaymentMethod::Mpesa,
            form.amount,
            MPESA_CURRENCY,
            &form.item_id,
            form.payment_type,
        );
        let request = PaymentRequest::Mpesa(MpesaRequest {
            phone_number: phone,
            amount: form.amount,
            currency: MPESA_CURRENCY.to_string(),
            item_id: form.item_id.clone(),
            payment_type: form.payment_type,
        });

        self.start(intent, request).await
    }

    pub async fn start_card(&self, form: &CardForm) -> Result<PaymentHandle, PaymentError> {
        let (digits, month, year) = validate::validate_card(&form.card_number, &form.expiry, &form.cvv)?;
        if form.holder_name.trim().is_empty() {
            return Err(PaymentError::ValidationError("Cardholder name is required".into()));
        }
        if form.currency.trim().is_empty() {
            return Err(PaymentError::ValidationError("Currency is required".into()));
        }
        validate::validate_amount(form.amount)?;
        validate::validate_item(&form.item_id)?;

        let intent = PaymentIntent::new(
            PaymentMethod::Card,
            form.amount,
            &form.currency,
            &form.item_id,
            form.payment_type,
        );
        let request = PaymentRequest::Card(CardRequest {
            card_number: digits,
            expiry_month: month,
            expiry_year: year,
            cvv: form.cvv.trim().to_string(),
            cardholder_name: form.holder_name.trim().to_string(),
            amount: form.amount,
            currency: form.currency.clone(),
            item_id: form.item_id.clone(),
            payment_type: form.payment_type,
        });

        self.start(intent, request).await
    }

    async fn start(&self, mut intent: PaymentIntent, request: PaymentRequest) -> Result<PaymentHandle, PaymentError> {
        info!(
            "Initiating {:?} payment {} for item {} ({} {})",
            intent.method, intent.id, intent.item_id, intent.amount, intent.currency
        );

        let initiation = self.gateway.initiate(&request).await?;
        if let Some(message) = initiation.message.as_deref() {
            debug!("Payment {} initiated: {}", intent.id, message);
        }
        intent.transaction_id = Some(initiation.reference);

        let policy = PollPolicy::for_method(intent.method, &self.config);
        Ok(poller::spawn_poll(Arc::clone(&self.gateway), intent, policy))
    }
}

#[derive(Debug, Clone)]
pub enum PaymentForm {
    Mpesa(MpesaForm),
    Card(CardForm),
}

enum FlowState {
    Idle,
    Active(PaymentHandle),
    Finished(PaymentStatus),
}

/// One checkout's `idle → processing → success | failed` lifecycle, with
/// `failed → idle` for "try again" and `cancel` from anywhere.
pub struct PaymentFlow {
    service: PaymentService,
    state: FlowState,
}

impl PaymentFlow {
    pub fn new(service: PaymentService) -> Self {
        Self {
            service,
            state: FlowState::Idle,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        match &self.state {
            FlowState::Idle => PaymentStatus::Idle,
            FlowState::Active(handle) => handle.status(),
            FlowState::Finished(status) => status.clone(),
        }
    }

    /// Validation failures leave the flow idle; a failed initiation moves it
    /// to failed.
    pub async fn submit(&mut self, form: &PaymentForm) -> Result<(), PaymentError> {
        self.settle();
        if !matches!(self.state, FlowState::Idle) {
            return Err(self.invalid("submit"));
        }

        let started = match form {
            PaymentForm::Mpesa(form) => self.service.start_mpesa(form).await,
            PaymentForm::Card(form) => self.service.start_card(form).await,
        };

        match started {
            Ok(handle) => {
                self.state = FlowState::Active(handle);
                Ok(())
            }
            Err(PaymentError::ValidationError(reason)) => Err(PaymentError::ValidationError(reason)),
            Err(e) => {
                self.state = FlowState::Finished(PaymentStatus::Failed { reason: e.to_string() });
                Err(e)
            }
        }
    }

    pub async fn wait(&mut self) -> Result<PaymentOutcome, PaymentError> {
        let handle = match std::mem::replace(&mut self.state, FlowState::Idle) {
            FlowState::Active(handle) => handle,
            other => {
                self.state = other;
                return Err(self.invalid("wait"));
            }
        };

        let result = handle.wait().await;
        self.state = match &result {
            Ok(_) => FlowState::Finished(PaymentStatus::Success),
            Err(PaymentError::Cancelled) => FlowState::Idle,
            Err(e) => FlowState::Finished(PaymentStatus::Failed { reason: e.to_string() }),
        };
        result
    }

    /// The "Try Again" path.
    pub fn reset(&mut self) -> Result<(), PaymentError> {
        self.settle();
        match self.state {
            FlowState::Finished(PaymentStatus::Failed { .. }) => {
                self.state = FlowState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("reset")),
        }
    }

    pub fn cancel(&mut self) {
        if let FlowState::Active(handle) = &self.state {
            info!("Cancelling payment {}", handle.intent_id());
            handle.cancel();
        }
        self.state = FlowState::Idle;
    }

    /// A poll that already published `failed` counts as finished, whether
    /// or not anyone waited on it.
    fn settle(&mut self) {
        if let FlowState::Active(handle) = &self.state {
            let status = handle.status();
            if matches!(status, PaymentStatus::Failed { .. }) {
                self.state = FlowState::Finished(status);
            }
        }
    }

    fn invalid(&self, action: &'static str) -> PaymentError {
        PaymentError::InvalidTransition {
            state: self.status().name().to_string(),
            action,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{
            atomic::{AtomicU32, Ordering},
            Mutex,
        },
        time::Duration,
    };
    use tokio::time::Instant;

    struct FakeGateway {
        initiations: AtomicU32,
        verifications: AtomicU32,
        script: Mutex<VecDeque<Verification>>,
    }

    impl FakeGateway {
        /// Answers `Pending` once the script runs out.
        fn scripted(script: Vec<Verification>) -> Arc<Self> {
            Arc::new(Self {
                initiations: AtomicU32::new(0),
                verifications: AtomicU32::new(0),
                script: Mutex::new(script.into()),
            })
        }

        fn checks(&self) -> u32 {
            self.verifications.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PaymentGateway for FakeGateway {
        async fn initiate(&self, _request: &PaymentRequest) -> Result<Initiation, ApiError> {
            self.initiations.fetch_add(1, Ordering::SeqCst);
            Ok(Initiation {
                reference: "ws_CO_123".to_string(),
                message: Some("Success. Request accepted for processing".to_string()),
            })
        }

        async fn verify(&self, _method: PaymentMethod, reference: &str) -> Result<Verification, ApiError> {
            assert_eq!(reference, "ws_CO_123");
            self.verifications.fetch_add(1, Ordering::SeqCst);
            Ok(self.script.lock().unwrap().pop_front().unwrap_or(Verification::Pending))
        }
    }

    fn service(gateway: Arc<FakeGateway>) -> PaymentService {
        PaymentService::new(gateway, PaymentConfig::default())
    }

    fn mpesa_form(phone: &str) -> MpesaForm {
        MpesaForm {
            phone: phone.to_string(),
            amount: 1500.0,
            item_id: "robot-7".to_string(),
            payment_type: PaymentType::Purchase,
        }
    }

    fn card_form() -> CardForm {
        CardForm {
            card_number: "4111 1111 1111 1111".to_string(),
            expiry: "09/27".to_string(),
            cvv: "123".to_string(),
            holder_name: "Achieng Odhiambo".to_string(),
            amount: 49.0,
            currency: "USD".to_string(),
            item_id: "plan-pro".to_string(),
            payment_type: PaymentType::Subscription,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_gives_up_after_ten_checks() {
        let gateway = FakeGateway::scripted(vec![]);
        let started = Instant::now();

        let handle = service(gateway.clone()).start_mpesa(&mpesa_form("0712345678")).await.unwrap();
        let status = handle.watch();
        let result = handle.wait().await;

        assert!(matches!(result, Err(PaymentError::VerificationTimeout { attempts: 10 })));
        assert_eq!(gateway.checks(), 10);
        assert!(matches!(*status.borrow(), PaymentStatus::Failed { .. }));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(50) && elapsed < Duration::from_secs(51));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.checks(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_is_visible_before_completion() {
        let gateway = FakeGateway::scripted(vec![Verification::Pending, Verification::Pending, Verification::Success]);

        let handle = service(gateway.clone()).start_mpesa(&mpesa_form("712345678")).await.unwrap();
        let mut status = handle.watch();

        status.wait_for(|s| *s == PaymentStatus::Success).await.unwrap();
        let seen_success_at = Instant::now();
        assert!(!handle.is_finished());

        let outcome = handle.wait().await.unwrap();
        let dwell = seen_success_at.elapsed();
        assert!(dwell >= Duration::from_secs(2) && dwell < Duration::from_millis(2_100));
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.intent.transaction_id.as_deref(), Some("ws_CO_123"));
        assert_eq!(outcome.intent.status, PaymentStatus::Success);
        assert_eq!(gateway.checks(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_payment_stops_polling() {
        let gateway = FakeGateway::scripted(vec![
            Verification::Pending,
            Verification::Failed("Request cancelled by user".to_string()),
        ]);

        let handle = service(gateway.clone()).start_mpesa(&mpesa_form("0712345678")).await.unwrap();
        let result = handle.wait().await;

        assert!(matches!(result, Err(PaymentError::Declined(reason)) if reason == "Request cancelled by user"));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.checks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_scheduled_checks() {
        let gateway = FakeGateway::scripted(vec![]);

        let handle = service(gateway.clone()).start_mpesa(&mpesa_form("0712345678")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(gateway.checks(), 2);

        handle.cancel();
        assert!(matches!(handle.wait().await, Err(PaymentError::Cancelled)));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.checks(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_handle_cancels_poll() {
        let gateway = FakeGateway::scripted(vec![]);

        let handle = service(gateway.clone()).start_mpesa(&mpesa_form("0712345678")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        drop(handle);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(gateway.checks(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_card_checks_once_immediately() {
        let gateway = FakeGateway::scripted(vec![]);
        let started = Instant::now();

        let handle = service(gateway.clone()).start_card(&card_form()).await.unwrap();
        let result = handle.wait().await;

        assert!(matches!(result, Err(PaymentError::VerificationTimeout { attempts: 1 })));
        assert_eq!(gateway.checks(), 1);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_invalid_forms_never_reach_gateway() {
        let gateway = FakeGateway::scripted(vec![]);
        let service = service(gateway.clone());

        assert!(matches!(
            service.start_mpesa(&mpesa_form("12345")).await,
            Err(PaymentError::ValidationError(_))
        ));

        let mut form = card_form();
        form.cvv = "1".to_string();
        assert!(matches!(
            service.start_card(&form).await,
            Err(PaymentError::ValidationError(_))
        ));

        assert_eq!(gateway.initiations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_failed_then_try_again() {
        let gateway = FakeGateway::scripted(vec![Verification::Failed("Insufficient funds".to_string())]);
        let mut flow = PaymentFlow::new(service(gateway.clone()));
        let form = PaymentForm::Mpesa(mpesa_form("0712345678"));

        assert_eq!(flow.status(), PaymentStatus::Idle);
        assert!(matches!(flow.reset(), Err(PaymentError::InvalidTransition { .. })));

        flow.submit(&form).await.unwrap();
        assert_eq!(flow.status(), PaymentStatus::Processing);
        assert!(matches!(
            flow.submit(&form).await,
            Err(PaymentError::InvalidTransition { action: "submit", .. })
        ));

        assert!(flow.wait().await.is_err());
        assert!(matches!(flow.status(), PaymentStatus::Failed { .. }));

        flow.reset().unwrap();
        assert_eq!(flow.status(), PaymentStatus::Idle);

        gateway.script.lock().unwrap().push_back(Verification::Success);
        flow.submit(&form).await.unwrap();
        flow.wait().await.unwrap();
        assert_eq!(flow.status(), PaymentStatus::Success);
        assert!(matches!(flow.reset(), Err(PaymentError::InvalidTransition { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_try_again_after_observed_failure() {
        let gateway = FakeGateway::scripted(vec![Verification::Failed("Insufficient funds".to_string())]);
        let mut flow = PaymentFlow::new(service(gateway.clone()));
        let form = PaymentForm::Mpesa(mpesa_form("0712345678"));

        flow.submit(&form).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(
            flow.status(),
            PaymentStatus::Failed {
                reason: "Insufficient funds".to_string()
            }
        );

        // no wait() in between: the UI only watched the status
        assert!(matches!(
            flow.submit(&form).await,
            Err(PaymentError::InvalidTransition { action: "submit", .. })
        ));
        flow.reset().unwrap();
        assert_eq!(flow.status(), PaymentStatus::Idle);

        gateway.script.lock().unwrap().push_back(Verification::Success);
        flow.submit(&form).await.unwrap();
        assert_eq!(gateway.initiations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flow_cancel_returns_to_idle() {
        let gateway = FakeGateway::scripted(vec![]);
        let mut flow = PaymentFlow::new(service(gateway.clone()));

        flow.submit(&PaymentForm::Card(card_form())).await.unwrap();
        flow.cancel();

        assert_eq!(flow.status(), PaymentStatus::Idle);
        assert!(matches!(flow.wait().await, Err(PaymentError::InvalidTransition { .. })));
    }

    #[test]
    fn test_verification_wire_formats() {
        let parse = |json: &str| serde_json::from_str::<Verification>(json).unwrap();

        assert_eq!(parse(r#"{"status":"completed"}"#), Verification::Success);
        assert_eq!(parse(r#"{"status":"PENDING"}"#), Verification::Pending);
        assert_eq!(
            parse(r#"{"status":"failed","message":"Insufficient funds"}"#),
            Verification::Failed("Insufficient funds".to_string())
        );
        assert_eq!(parse(r#"{"ResultCode":"0","ResultDesc":"ok"}"#), Verification::Success);
        assert_eq!(
            parse(r#"{"ResultCode":1032,"ResultDesc":"Request cancelled by user"}"#),
            Verification::Failed("Request cancelled by user".to_string())
        );
        assert_eq!(parse(r#"{"success":true}"#), Verification::Success);
        assert_eq!(parse(r#"{}"#), Verification::Pending);
    }
}
