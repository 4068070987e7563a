//! JID normalization and contact fingerprints.
//!
//! Some `contacts.update` events are keyed not by a canonical JID but by a
//! short fingerprint derived from one.  The fingerprint is the first three
//! characters of the URL-safe base64 encoding of a SHA-256 digest over the
//! normalized user part of the JID plus a fixed salt.  Three characters of
//! digest cannot guarantee uniqueness; resolution against it is best-effort
//! (see [`crate::store::MirrorStore`]).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// Salt mixed into every contact fingerprint.
const FINGERPRINT_SALT: &str = "mirror-contact-id";

/// Number of digest characters kept in a fingerprint.
const FINGERPRINT_LEN: usize = 3;

/// The user part of a JID: everything before `@`, with any `:device`
/// suffix stripped.
///
/// `"1234567890:12@s.whatsapp.net"` → `"1234567890"`.
pub fn normalized_user(jid: &str) -> &str {
    let user = jid.split('@').next().unwrap_or(jid);
    user.split(':').next().unwrap_or(user)
}

/// Compute the short fingerprint for a canonical JID.
pub fn contact_fingerprint(jid: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_user(jid).as_bytes());
    hasher.update(FINGERPRINT_SALT.as_bytes());
    let encoded = URL_SAFE_NO_PAD.encode(hasher.finalize());
    encoded.chars().take(FINGERPRINT_LEN).collect()
}
