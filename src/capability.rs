//! Capability gate and version checks.
//!
//! Two independent version axes decide how symmetric memory behaves:
//!
//! - The communicator (NCCL) version must be at least
//!   [`MIN_SYMMETRIC_COMM_VERSION`] for symmetric windows to exist at all.
//! - The device runtime version selects which pair of graph-pool
//!   pause/resume primitives is available ([`PoolPauseApi`]), and whether the
//!   default-stream registration workaround applies.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Oldest communicator release with symmetric window registration (2.27.3).
pub const MIN_SYMMETRIC_COMM_VERSION: CommVersion = CommVersion::from_code(22703);

/// Runtime release that renamed the graph-pool pause/resume primitives and
/// fixed the multi-thread pool snapshot defect.
pub const POOL_API_THRESHOLD: RuntimeVersion = RuntimeVersion::new(2, 8, 0);

/// Process-wide enablement flag for symmetric memory.
///
/// Cheap enough to consult on every scope construction.
#[derive(Debug, Default)]
pub struct CapabilityGate {
    enabled: AtomicBool,
}

impl CapabilityGate {
    /// Create a gate with the given initial state.
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Whether symmetric memory is enabled.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the flag. Scopes constructed afterwards observe the new value.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// A communicator version as reported by NCCL's integer version code.
///
/// Codes since 2.9 encode `major * 10000 + minor * 100 + patch`
/// (`22703` is 2.27.3); older releases used `major * 1000 + minor * 100 + patch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommVersion(u32);

impl CommVersion {
    /// Wrap a raw version code.
    pub const fn from_code(code: u32) -> Self {
        Self(code)
    }

    /// The raw version code.
    pub const fn code(&self) -> u32 {
        self.0
    }

    /// Split into `(major, minor, patch)`.
    pub const fn parts(&self) -> (u32, u32, u32) {
        if self.0 >= 10000 {
            (self.0 / 10000, (self.0 / 100) % 100, self.0 % 100)
        } else {
            (self.0 / 1000, (self.0 % 1000) / 100, self.0 % 100)
        }
    }

    /// Whether symmetric windows can be registered with this version.
    pub fn supports_symmetric_memory(&self) -> bool {
        *self >= MIN_SYMMETRIC_COMM_VERSION
    }
}

impl fmt::Display for CommVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (major, minor, patch) = self.parts();
        write!(f, "{}.{}.{}", major, minor, patch)
    }
}

/// Release stage of a runtime version. Declaration order is sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Stage {
    Dev,
    Pre,
    Final,
}

impl Stage {
    fn classify(tag: &str) -> Option<Self> {
        let tag = tag.trim_start_matches(['-', '_', '.']).to_ascii_lowercase();
        if tag.starts_with("dev") {
            Some(Stage::Dev)
        } else if tag.starts_with("post") {
            Some(Stage::Final)
        } else if ["a", "b", "c", "rc", "alpha", "beta", "pre", "preview"]
            .iter()
            .any(|p| tag.starts_with(p))
        {
            Some(Stage::Pre)
        } else {
            None
        }
    }
}

/// Error returned when a runtime version string cannot be understood.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognised runtime version '{0}'")]
pub struct VersionParseError(String);

/// A device-runtime version such as `2.7.1+cu126` or `2.8.0.dev20250501`.
///
/// Only `major.minor.patch` and the release stage take part in comparisons:
/// pre-releases and dev builds sort before the release they lead up to, and
/// local labels after `+` are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion {
    major: u32,
    minor: u32,
    patch: u32,
    stage: Stage,
}

impl RuntimeVersion {
    /// A final release version.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            stage: Stage::Final,
        }
    }

    /// Parse a version string.
    pub fn parse(s: &str) -> Result<Self, VersionParseError> {
        let err = || VersionParseError(s.to_string());
        let public = s.trim().split('+').next().unwrap_or_default();
        let public = public.strip_prefix('v').unwrap_or(public);

        let mut nums = [0u32; 3];
        let mut count = 0;
        let mut stage = Stage::Final;

        for part in public.split('.') {
            let split = part
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(part.len());
            let (digits, rest) = part.split_at(split);

            if !digits.is_empty() && count < 3 {
                nums[count] = digits.parse().map_err(|_| err())?;
                count += 1;
            } else if digits.is_empty() && count == 0 {
                return Err(err());
            }

            if !rest.is_empty() {
                stage = stage.min(Stage::classify(rest).ok_or_else(err)?);
            }
        }

        if count == 0 {
            return Err(err());
        }

        Ok(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums[2],
            stage,
        })
    }

    /// Whether this is a final release (not a pre-release or dev build).
    pub fn is_release(&self) -> bool {
        self.stage == Stage::Final
    }

    /// Whether this version predates [`POOL_API_THRESHOLD`].
    pub fn is_pre_threshold(&self) -> bool {
        *self < POOL_API_THRESHOLD
    }
}

impl FromStr for RuntimeVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        match self.stage {
            Stage::Final => Ok(()),
            Stage::Pre => write!(f, " (pre-release)"),
            Stage::Dev => write!(f, " (dev)"),
        }
    }
}

/// Whether `version` predates the runtime release that changed the
/// graph-pool pause API.
pub fn version_is_pre_threshold(version: &RuntimeVersion) -> bool {
    version.is_pre_threshold()
}

/// Which generation of graph-pool pause/resume primitives the runtime offers.
///
/// Resolved once when a scope is armed and dispatched with a plain `match`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolPauseApi {
    /// Runtimes before [`POOL_API_THRESHOLD`]:
    /// pause with `end_allocate_current_stream_to_pool`,
    /// resume with `begin_allocate_to_pool`.
    PreThreshold,
    /// Runtimes from [`POOL_API_THRESHOLD`] on:
    /// pause with `end_allocate_to_pool`,
    /// resume with `begin_allocate_current_thread_to_pool`.
    PostThreshold,
}

impl PoolPauseApi {
    /// Select the API generation for a runtime version.
    pub fn for_version(version: &RuntimeVersion) -> Self {
        if version_is_pre_threshold(version) {
            PoolPauseApi::PreThreshold
        } else {
            PoolPauseApi::PostThreshold
        }
    }

    /// Whether this runtime suffers from the multi-thread pool snapshot
    /// defect that the default-stream skip rule works around.
    pub fn has_snapshot_defect(&self) -> bool {
        matches!(self, PoolPauseApi::PreThreshold)
    }
}
