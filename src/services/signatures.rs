//! HMAC signature verification for gateway callbacks.
//!
//! Two distinct signing contracts share the primitive but nothing else:
//! the synchronous confirmation signs `"{intent_id}|{payment_id}"` with the
//! gateway key secret, while webhooks sign the raw request body with the
//! webhook secret. They must never be conflated.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::AppConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct SignatureVerifier {
    payment_secret: String,
    webhook_secret: String,
}

impl SignatureVerifier {
    pub fn new(payment_secret: String, webhook_secret: String) -> Self {
        Self {
            payment_secret,
            webhook_secret,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.gateway_key_secret.clone(),
            config.payment_webhook_secret.clone(),
        )
    }

    /// Verifies the synchronous payment confirmation signature.
    pub fn verify_payment(
        &self,
        intent_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<(), ServiceError> {
        let expected = self.payment_signature(intent_id, payment_id);
        if constant_time_eq(&expected, signature) {
            Ok(())
        } else {
            Err(ServiceError::AuthError(
                "payment signature verification failed".to_string(),
            ))
        }
    }

    /// Verifies a webhook body signature.
    pub fn verify_webhook(&self, body: &[u8], signature: &str) -> Result<(), ServiceError> {
        let expected = hmac_hex(self.webhook_secret.as_bytes(), body);
        if constant_time_eq(&expected, signature) {
            Ok(())
        } else {
            Err(ServiceError::AuthError(
                "webhook signature verification failed".to_string(),
            ))
        }
    }

    /// Expected signature over `"{intent_id}|{payment_id}"`. What the gateway
    /// computes on its side; exposed so tests and tooling can mint valid
    /// confirmations.
    pub fn payment_signature(&self, intent_id: &str, payment_id: &str) -> String {
        let material = format!("{}|{}", intent_id, payment_id);
        hmac_hex(self.payment_secret.as_bytes(), material.as_bytes())
    }

    /// Expected signature over a raw webhook body.
    pub fn webhook_signature(&self, body: &[u8]) -> String {
        hmac_hex(self.webhook_secret.as_bytes(), body)
    }
}

fn hmac_hex(secret: &[u8], material: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(material);
    hex::encode(mac.finalize().into_bytes())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
