use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::types::SignatureAlgo;

/// `X-Alyx-Signature: sha256=<hex>` (or `sha1=`) over the raw request body
/// (§4.F "include an HMAC signature header when a secret is configured").
pub fn sign(secret: &str, algo: SignatureAlgo, body: &[u8]) -> String {
    match algo {
        SignatureAlgo::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
            mac.update(body);
            format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
        },
        SignatureAlgo::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
            mac.update(body);
            format!("sha1={}", hex::encode(mac.finalize().into_bytes()))
        },
    }
}
