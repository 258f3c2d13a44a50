//! Site, user and network identity, with optional one-way hashing.

use super::{PrivacyFlags, ProcessContext, Processor};
use crate::record::EventRecord;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of `salt ‖ value`.
pub fn hash_value(salt: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Attaches site, user, session and remote IP from the runtime context.
///
/// When the logger's privacy flags ask for it, the IP and the user id/name
/// are replaced by salted hashes. A record goes through this at most once:
/// the first pass sets the record's privacy marker and later passes return
/// it untouched.
#[derive(Debug, Clone)]
pub struct IdentityProcessor {
    privacy: PrivacyFlags,
    salt: String,
}

impl IdentityProcessor {
    pub fn new(privacy: PrivacyFlags, salt: impl Into<String>) -> Self {
        Self {
            privacy,
            salt: salt.into(),
        }
    }

    fn hash(&self, value: Option<String>) -> Option<String> {
        value.map(|v| hash_value(&self.salt, &v))
    }
}

impl Processor for IdentityProcessor {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn process(&self, mut record: EventRecord, ctx: &ProcessContext<'_>) -> EventRecord {
        if record.is_privacy_applied() {
            return record;
        }

        let runtime = ctx.runtime;
        record.site_id = runtime.site_id;
        record.site_name = runtime.site_name.clone();
        record.user_session = runtime.session.clone();
        record.user_id = runtime.user_id.clone();
        record.user_name = runtime.user_name.clone();
        record.remote_ip = runtime.remote_ip.clone();

        if self.privacy.obfuscate_ip {
            record.remote_ip = self.hash(record.remote_ip.take());
        }
        if self.privacy.pseudonymize_user {
            record.user_id = self.hash(record.user_id.take());
            record.user_name = self.hash(record.user_name.take());
        }

        record.privacy_applied = true;
        record
    }
}
