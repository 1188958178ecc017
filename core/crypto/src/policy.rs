//! Native acceleration selection.
//!
//! Every cipher engine and key derivation function has a portable
//! implementation. Some also have an accelerated one that must produce
//! identical output. The policy decides, once per process, whether the
//! accelerated path may be used: capability detection has to succeed and the
//! running device must not be on the exclusion list. Both checks are cached
//! after their first evaluation.

use once_cell::sync::OnceCell;
use std::fmt;
use tracing::debug;

/// Which implementation services a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Hardware accelerated path.
    Native,
    /// Reference implementation, always available.
    Portable,
}

/// Operations that may have an accelerated implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerated {
    AesCipher,
    TwofishCipher,
    ChaCha20Cipher,
    AesKdf,
    Argon2,
}

impl Accelerated {
    /// Whether an accelerated path exists at all.
    pub fn has_native_path(self) -> bool {
        matches!(self, Accelerated::AesCipher | Accelerated::AesKdf | Accelerated::Argon2)
    }
}

/// Detects whether the accelerated implementation is available.
pub trait NativeDetector: Send + Sync {
    /// Try to bring up the accelerated implementation.
    fn detect(&self) -> bool;
}

/// Detects AES instructions on the executing CPU.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuDetector;

impl NativeDetector for CpuDetector {
    fn detect(&self) -> bool {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            std::arch::is_x86_feature_detected!("aes") && std::arch::is_x86_feature_detected!("sse2")
        }
        #[cfg(target_arch = "aarch64")]
        {
            std::arch::is_aarch64_feature_detected!("aes")
        }
        #[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
        {
            false
        }
    }
}

/// Detector with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedDetector(pub bool);

impl NativeDetector for FixedDetector {
    fn detect(&self) -> bool {
        self.0
    }
}

/// Device models on which the accelerated path is known to misbehave.
pub const DEFAULT_DEVICE_EXCLUSIONS: &[&str] = &["GT-I9100", "GT-I9300", "SGH-T989", "SM-G900"];

/// Process-wide acceleration decision.
///
/// Construct one explicitly and pass it to the operations that need it,
/// or use [`SelectionPolicy::shared`].
pub struct SelectionPolicy {
    enabled: bool,
    device_model: Option<String>,
    exclusions: Vec<String>,
    detector: Box<dyn NativeDetector>,
    native_available: OnceCell<bool>,
    device_excluded: OnceCell<bool>,
}

static SHARED: OnceCell<SelectionPolicy> = OnceCell::new();

impl SelectionPolicy {
    /// Create a policy with CPU detection and the default exclusion list.
    pub fn new() -> Self {
        Self::with_detector(Box::new(CpuDetector))
    }

    /// Create a policy using a custom detector.
    pub fn with_detector(detector: Box<dyn NativeDetector>) -> Self {
        Self {
            enabled: true,
            device_model: None,
            exclusions: DEFAULT_DEVICE_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
            detector,
            native_available: OnceCell::new(),
            device_excluded: OnceCell::new(),
        }
    }

    /// Policy that never uses the accelerated path.
    pub fn portable_only() -> Self {
        Self::new().with_native(false)
    }

    /// Enable or disable native acceleration altogether.
    pub fn with_native(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the model of the executing device.
    pub fn with_device_model(mut self, model: impl Into<String>) -> Self {
        self.device_model = Some(model.into());
        self
    }

    /// Replace the device exclusion list.
    pub fn with_exclusions<I, S>(mut self, exclusions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions = exclusions.into_iter().map(Into::into).collect();
        self
    }

    /// The lazily-built process-wide default policy.
    pub fn shared() -> &'static SelectionPolicy {
        SHARED.get_or_init(SelectionPolicy::new)
    }

    /// Whether the accelerated implementation initialized. Checked once.
    pub fn native_available(&self) -> bool {
        *self.native_available.get_or_init(|| {
            let available = self.detector.detect();
            if !available {
                debug!("Native acceleration unavailable, using portable implementations");
            }
            available
        })
    }

    /// Whether the executing device is on the exclusion list. Checked once.
    pub fn device_excluded(&self) -> bool {
        *self.device_excluded.get_or_init(|| {
            let excluded = self.device_model.as_deref().is_some_and(|model| {
                self.exclusions
                    .iter()
                    .any(|entry| model.eq_ignore_ascii_case(entry) || model.starts_with(entry.as_str()))
            });
            if excluded {
                debug!("Device is excluded from native acceleration");
            }
            excluded
        })
    }

    /// Whether the accelerated path should service `requested`.
    pub fn prefer_native(&self, requested: Accelerated) -> bool {
        self.enabled
            && requested.has_native_path()
            && !self.device_excluded()
            && self.native_available()
    }

    /// Backend chosen for `requested`.
    pub fn backend_for(&self, requested: Accelerated) -> Backend {
        if self.prefer_native(requested) {
            Backend::Native
        } else {
            Backend::Portable
        }
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionPolicy")
            .field("enabled", &self.enabled)
            .field("device_model", &self.device_model)
            .field("exclusions", &self.exclusions.len())
            .field("native_available", &self.native_available.get())
            .field("device_excluded", &self.device_excluded.get())
            .finish()
    }
}
