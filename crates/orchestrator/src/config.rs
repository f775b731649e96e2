//! Tunables for the orchestrators.

/// Content checks applied to uploads before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    /// Accepted MIME types, compared case-insensitively.
    pub allowed_content_types: Vec<String>,
    pub max_bytes: usize,
}

impl UploadPolicy {
    pub fn allows_type(&self, content_type: &str) -> bool {
        self.allowed_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type.trim()))
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            allowed_content_types: ["image/jpeg", "image/png", "image/webp", "image/gif"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Configuration for [`crate::ProductWriter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Suffix attempts before a variant SKU is given up on. `None` never
    /// gives up.
    pub sku_max_attempts: Option<u32>,
    pub upload: UploadPolicy,
}

impl WriterConfig {
    /// Maps the conventional "0 means unbounded" setting onto an option.
    pub fn attempts_from_setting(setting: u32) -> Option<u32> {
        (setting > 0).then_some(setting)
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            sku_max_attempts: Some(1000),
            upload: UploadPolicy::default(),
        }
    }
}

/// Configuration for [`crate::CheckoutOrchestrator`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckoutConfig {
    /// Tax rate in basis points (1000 = 10%).
    pub tax_rate_bps: u32,
}
