use sha2::{Sha256, Digest};
use shared::types::ServiceRecord;

/// Digest of the registry contents.
///
/// Only descriptive fields are fed in, so ids and start/stop timestamps do
/// not move the digest. Each field is length-prefixed to keep adjacent
/// values from running together.
pub fn compute_hash(services: &[ServiceRecord]) -> String {
    let mut ordered: Vec<&ServiceRecord> = services.iter().collect();
    ordered.sort_by(|a, b| a.identity.cmp(&b.identity));

    let mut hasher = Sha256::new();
    for record in ordered {
        for field in [
            record.identity.name.as_str(),
            record.identity.version.as_str(),
            record.app_url.as_str(),
            record.health_check_url.as_str(),
            record.description.as_str(),
            record.status.as_str(),
            record.version_tag.as_str(),
        ] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
    }

    hex::encode(hasher.finalize())
}
