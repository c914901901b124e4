use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

const ENGINE: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Issues a capability token for one booking: `{expires}.{signature}`, where the
/// signature is an HMAC over the booking id and the expiry timestamp.
pub fn issue(secret: &str, booking_id: &str, expires_at: DateTime<Utc>) -> String {
    let expires = expires_at.timestamp();
    format!("{expires}.{}", ENGINE.encode(sign(secret, booking_id, expires)))
}

/// Checks signature and expiry. Whether the booking still accepts the token (it is
/// revoked once the booking reaches a terminal state) is up to the caller.
pub fn verify(secret: &str, booking_id: &str, token: &str, now: DateTime<Utc>) -> bool {
    let Some((expires, signature)) = token.split_once('.') else {
        return false;
    };
    let Ok(expires) = expires.parse::<i64>() else {
        return false;
    };
    if expires <= now.timestamp() {
        return false;
    }
    let Ok(signature) = ENGINE.decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha1::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload(booking_id, expires).as_bytes());
    mac.verify_slice(&signature).is_ok()
}

fn sign(secret: &str, booking_id: &str, expires: i64) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return vec![],
    };
    mac.update(payload(booking_id, expires).as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn payload(booking_id: &str, expires: i64) -> String {
    format!("{booking_id}:{expires}")
}
