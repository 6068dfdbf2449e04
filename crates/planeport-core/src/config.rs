//! Per-surface configuration.

use crate::format::BufferFormat;

/// Env var forcing buffer pinning on (`1`/`true`) or off (`0`/`false`).
pub const ENV_PIN_BUFFERS: &str = "PLANEPORT_PIN_BUFFERS";
/// Env var selecting the gate mode (`barrier` or `bracket`).
pub const ENV_GATE_MODE: &str = "PLANEPORT_GATE_MODE";

/// How the engine's write path uses the handoff gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateMode {
    /// `lock` waits for any in-flight read, publishes the plane pointers and
    /// releases the gate again. The pixel write itself runs outside the gate.
    #[default]
    Barrier,
    /// The gate is held from `lock` until the engine's `unlock` callback, so
    /// a reader never observes a half-written frame.
    Bracket,
}

impl GateMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "barrier" => Some(GateMode::Barrier),
            "bracket" => Some(GateMode::Bracket),
            _ => None,
        }
    }
}

/// Configuration for one [`FrameSurface`](crate::surface::FrameSurface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfig {
    /// Format requested from the engine
    pub format: BufferFormat,
    /// Lock plane buffers against paging
    pub pin_buffers: bool,
    pub gate_mode: GateMode,
}

impl SurfaceConfig {
    pub fn new(format: BufferFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    pub fn pin_buffers(mut self, pin: bool) -> Self {
        self.pin_buffers = pin;
        self
    }

    pub fn gate_mode(mut self, mode: GateMode) -> Self {
        self.gate_mode = mode;
        self
    }

    /// Applies `PLANEPORT_PIN_BUFFERS` and `PLANEPORT_GATE_MODE` if set.
    pub fn with_env_overrides(self) -> Self {
        let pin = std::env::var(ENV_PIN_BUFFERS).ok();
        let mode = std::env::var(ENV_GATE_MODE).ok();
        self.apply_overrides(pin.as_deref(), mode.as_deref())
    }

    fn apply_overrides(mut self, pin: Option<&str>, mode: Option<&str>) -> Self {
        if let Some(value) = pin {
            match parse_flag(value) {
                Some(pin) => self.pin_buffers = pin,
                None => tracing::warn!("Ignoring {ENV_PIN_BUFFERS}={value:?}"),
            }
        }
        if let Some(value) = mode {
            match GateMode::parse(value) {
                Some(mode) => self.gate_mode = mode,
                None => tracing::warn!("Ignoring {ENV_GATE_MODE}={value:?}"),
            }
        }
        self
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            format: BufferFormat::rv32(),
            pin_buffers: false,
            gate_mode: GateMode::Barrier,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;

    #[test]
    fn defaults_match_engine_expectations() {
        let config = SurfaceConfig::default();
        assert_eq!(config.format, BufferFormat::rv32());
        assert!(!config.pin_buffers);
        assert_eq!(config.gate_mode, GateMode::Barrier);
    }

    #[test]
    fn overrides_are_applied() {
        let config = SurfaceConfig::new(BufferFormat::nv12())
            .apply_overrides(Some("TRUE"), Some(" bracket "));
        assert!(config.pin_buffers);
        assert_eq!(config.gate_mode, GateMode::Bracket);
        assert_eq!(config.format, BufferFormat::nv12());
    }

    #[test]
    #[traced_test]
    fn garbage_overrides_are_ignored() {
        let config = SurfaceConfig::default()
            .pin_buffers(true)
            .apply_overrides(Some("maybe"), Some("triple"));
        assert!(config.pin_buffers);
        assert_eq!(config.gate_mode, GateMode::Barrier);
        assert!(logs_contain("Ignoring PLANEPORT_PIN_BUFFERS"));
        assert!(logs_contain("Ignoring PLANEPORT_GATE_MODE"));
    }
}
