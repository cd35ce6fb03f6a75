use crate::model::PromptTemplate;
use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Identity of a resolved prompt template, recorded on the run so two runs can be
/// compared even if a template was later edited in place under the same version.
pub fn prompt_fingerprint(prompt: &PromptTemplate) -> String {
    let parts = [
        format!("id={}", prompt.id),
        format!("version={}", prompt.version),
        format!("role={}", prompt.role.as_str()),
        format!("template={}", prompt.template),
    ];
    sha256_hex(&parts.join("\n"))
}
