//! PayTR hosted payment page integration: request signing, webhook
//! verification and the HTTP token client.

use app_config::PayTrSettings;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, instrument};

type HmacSha256 = Hmac<Sha256>;

const NO_INSTALLMENT: u8 = 0;
const MAX_INSTALLMENT: u8 = 0;
const TIMEOUT_LIMIT_MINUTES: u8 = 30;
const DEBUG_ON: u8 = 1;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never produced a usable response.
    #[error("PayTR request failed: {0}")]
    Transport(String),
    /// PayTR answered with `status != success`.
    #[error("{reason}")]
    Rejected { reason: String, response: Value },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl GatewayError {
    pub fn reason(&self) -> String {
        match self {
            Self::Transport(msg) => msg.clone(),
            Self::Rejected { reason, .. } => reason.clone(),
        }
    }

    /// Raw gateway response, when there was one.
    pub fn response(&self) -> Option<&Value> {
        match self {
            Self::Transport(_) => None,
            Self::Rejected { response, .. } => Some(response),
        }
    }
}

/// Everything needed to ask PayTR for an iframe token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenRequest {
    pub merchant_oid: String,
    pub user_ip: String,
    pub email: String,
    /// Minor units.
    pub payment_amount: i64,
    /// Base64 of the JSON basket.
    pub user_basket: String,
    pub currency: String,
    pub user_name: String,
    pub user_address: String,
    pub user_phone: String,
}

/// HMAC-SHA256 signatures shared by the token request and the webhook.
#[derive(Clone)]
pub struct PayTrSigner {
    merchant_id: String,
    merchant_key: String,
    merchant_salt: String,
    test_mode: bool,
}

impl PayTrSigner {
    pub fn new(settings: &PayTrSettings) -> Self {
        Self {
            merchant_id: settings.merchant_id.clone(),
            merchant_key: settings.merchant_key.clone(),
            merchant_salt: settings.merchant_salt.clone(),
            test_mode: settings.test_mode,
        }
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn test_mode_flag(&self) -> u8 {
        u8::from(self.test_mode)
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.merchant_key.as_bytes())
            .expect("HMAC can take key of any size")
    }

    /// `paytr_token` field of the token request.
    pub fn token_signature(&self, req: &TokenRequest) -> String {
        let message = format!(
            "{}{}{}{}{}{}{}{}{}{}{}",
            self.merchant_id,
            req.user_ip,
            req.merchant_oid,
            req.email,
            req.payment_amount,
            req.user_basket,
            NO_INSTALLMENT,
            MAX_INSTALLMENT,
            req.currency,
            self.test_mode_flag(),
            self.merchant_salt,
        );
        let mut mac = self.mac();
        mac.update(message.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Hash PayTR attaches to a notification.
    pub fn notification_signature(
        &self,
        merchant_oid: &str,
        status: &str,
        total_amount: i64,
    ) -> String {
        let mut mac = self.mac();
        let message = notification_message(merchant_oid, &self.merchant_salt, status, total_amount);
        mac.update(message.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a received notification hash.
    pub fn verify_notification(
        &self,
        merchant_oid: &str,
        status: &str,
        total_amount: i64,
        received: &str,
    ) -> bool {
        let Ok(received) = STANDARD.decode(received.trim()) else {
            return false;
        };
        let mut mac = self.mac();
        let message = notification_message(merchant_oid, &self.merchant_salt, status, total_amount);
        mac.update(message.as_bytes());
        mac.verify_slice(&received).is_ok()
    }

    /// Form body of the token request, signature included.
    pub fn token_form(
        &self,
        req: &TokenRequest,
        frontend_url: &str,
    ) -> Vec<(&'static str, String)> {
        let frontend_url = frontend_url.trim_end_matches('/');
        vec![
            ("merchant_id", self.merchant_id.clone()),
            ("user_ip", req.user_ip.clone()),
            ("merchant_oid", req.merchant_oid.clone()),
            ("email", req.email.clone()),
            ("payment_amount", req.payment_amount.to_string()),
            ("paytr_token", self.token_signature(req)),
            ("user_basket", req.user_basket.clone()),
            ("debug_on", DEBUG_ON.to_string()),
            ("no_installment", NO_INSTALLMENT.to_string()),
            ("max_installment", MAX_INSTALLMENT.to_string()),
            ("user_name", req.user_name.clone()),
            ("user_address", req.user_address.clone()),
            ("user_phone", req.user_phone.clone()),
            ("merchant_ok_url", format!("{frontend_url}/payment/success")),
            ("merchant_fail_url", format!("{frontend_url}/payment/fail")),
            ("timeout_limit", TIMEOUT_LIMIT_MINUTES.to_string()),
            ("currency", req.currency.clone()),
            ("test_mode", self.test_mode_flag().to_string()),
        ]
    }
}

fn notification_message(merchant_oid: &str, salt: &str, status: &str, total_amount: i64) -> String {
    format!("{merchant_oid}{salt}{status}{total_amount}")
}

/// Token endpoint of the hosted payment page.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Returns the iframe token for a payment attempt.
    async fn request_token(&self, req: &TokenRequest) -> Result<String, GatewayError>;

    fn iframe_url(&self, token: &str) -> String;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    status: String,
    token: Option<String>,
    reason: Option<String>,
}

/// reqwest-backed [`PaymentGateway`].
pub struct PayTrClient {
    http: reqwest::Client,
    signer: PayTrSigner,
    api_url: String,
    iframe_url: String,
    frontend_url: String,
}

impl PayTrClient {
    pub fn new(settings: &PayTrSettings) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            http,
            signer: PayTrSigner::new(settings),
            api_url: settings.api_url.clone(),
            iframe_url: settings.iframe_url.clone(),
            frontend_url: settings.frontend_url.clone(),
        })
    }
}

#[async_trait]
impl PaymentGateway for PayTrClient {
    #[instrument(skip(self, req), fields(merchant_oid = %req.merchant_oid))]
    async fn request_token(&self, req: &TokenRequest) -> Result<String, GatewayError> {
        let form = self.signer.token_form(req, &self.frontend_url);
        let body: Value = self
            .http
            .post(&self.api_url)
            .form(&form)
            .send()
            .await?
            .json()
            .await?;
        debug!(response = %body, "PayTR token response");

        match serde_json::from_value::<TokenResponse>(body.clone()) {
            Ok(TokenResponse {
                status,
                token: Some(token),
                ..
            }) if status == "success" => Ok(token),
            Ok(TokenResponse { reason, .. }) => Err(GatewayError::Rejected {
                reason: reason.unwrap_or_else(|| "PayTR token alınamadı".to_string()),
                response: body,
            }),
            Err(_) => Err(GatewayError::Rejected {
                reason: "PayTR token alınamadı".to_string(),
                response: body,
            }),
        }
    }

    fn iframe_url(&self, token: &str) -> String {
        format!("{}{}", self.iframe_url, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn settings() -> PayTrSettings {
        PayTrSettings {
            merchant_id: "123456".into(),
            merchant_key: "test_key".into(),
            merchant_salt: "test_salt".into(),
            test_mode: true,
            api_url: "https://www.paytr.com/odeme/api/get-token".into(),
            iframe_url: "https://www.paytr.com/odeme/guvenli/".into(),
            timeout: Duration::from_secs(30),
            frontend_url: "http://localhost:3000/".into(),
        }
    }

    fn request() -> TokenRequest {
        TokenRequest {
            merchant_oid: "ORDABCDEFGH11700000000".into(),
            user_ip: "127.0.0.1".into(),
            email: "ayse@example.com".into(),
            payment_amount: 12_990,
            user_basket: STANDARD.encode(r#"[["Kupa","99.00",1]]"#),
            currency: "TRY".into(),
            user_name: "Ayşe Yılmaz".into(),
            user_address: "Adres belirtilmedi".into(),
            user_phone: "0000000000".into(),
        }
    }

    fn reference_hmac(key: &str, message: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(message.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_token_signature_concatenation() {
        let signer = PayTrSigner::new(&settings());
        let req = request();
        let expected = reference_hmac(
            "test_key",
            &format!(
                "123456127.0.0.1ORDABCDEFGH11700000000ayse@example.com12990{}00TRY1test_salt",
                req.user_basket
            ),
        );
        assert_eq!(signer.token_signature(&req), expected);
    }

    #[test]
    fn test_notification_hash_roundtrip() {
        let signer = PayTrSigner::new(&settings());
        let hash = signer.notification_signature("ORD1", "success", 12_990);
        assert_eq!(hash, reference_hmac("test_key", "ORD1test_saltsuccess12990"));
        assert!(signer.verify_notification("ORD1", "success", 12_990, &hash));
        assert!(!signer.verify_notification("ORD1", "success", 12_991, &hash));
        assert!(!signer.verify_notification("ORD1", "success", 12_990, "not base64!"));
    }

    #[test]
    fn test_token_form_fields() {
        let signer = PayTrSigner::new(&settings());
        let form = signer.token_form(&request(), "http://localhost:3000/");
        let get = |name: &str| {
            form.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("merchant_ok_url"), "http://localhost:3000/payment/success");
        assert_eq!(get("merchant_fail_url"), "http://localhost:3000/payment/fail");
        assert_eq!(get("timeout_limit"), "30");
        assert_eq!(get("debug_on"), "1");
        assert_eq!(get("test_mode"), "1");
        assert_eq!(get("payment_amount"), "12990");
    }
}
