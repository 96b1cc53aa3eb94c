// config.rs — process-level engine configuration.
// Converted from: myq2-original/qcommon/cvar.c's Cvar/CvarContext — the
// name/value/flags triple and "get once, set afterward" lifecycle survive
// here as a small typed registry, trimmed of the console-command surface
// (archive files, userinfo/serverinfo strings, wildcard cvarlist) since this
// engine has no console, just a handful of fixed settings an embedder sets
// once at startup.

use std::sync::RwLock;

use crate::stream::IoStreamKind;

bitflags::bitflags! {
    /// Mirrors the original engine's cvar flag bits that still matter once
    /// there's no console: `NOSET` (can't be overridden once construction
    /// has completed) and `ARCHIVE` (worth surfacing in a diagnostic dump).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigFlags: u8 {
        const NOSET   = 0x01;
        const ARCHIVE = 0x02;
    }
}

/// Fixed set of process-wide knobs the snapshot engine needs. Unlike the
/// original's open-ended cvar table, this engine's settings are known
/// ahead of time, so they're plain struct fields rather than a
/// name-indexed map — but each one still carries the same "locked after
/// first set" semantics `CVAR_NOSET` gave the original.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which entropy coder the wire format is bound to. Must agree with
    /// the server; set once at connection time and never changed mid-session.
    pub io_stream_kind: IoStreamKind,
    /// How many historical baselines the per-entity cache retains.
    pub baseline_cache_capacity: usize,
    /// Capacity of the outstanding-command ring (fixed at 3 per protocol).
    pub command_ring_capacity: usize,
    /// Capacity of the outstanding-package delivery table.
    pub outstanding_package_capacity: usize,
    locked: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            io_stream_kind: IoStreamKind::Raw,
            baseline_cache_capacity: 32,
            command_ring_capacity: 3,
            outstanding_package_capacity: 64,
            locked: false,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the configuration against further changes, mirroring
    /// `CVAR_NOSET` taking effect once the connection handshake starts.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Apply an override, refusing once the config is locked. Returns
    /// `false` (and logs via [`crate::log::com_error`] with [`crate::log::ErrCode::Drop`])
    /// instead of panicking, since a late reconfiguration attempt is a
    /// caller bug, not data corruption.
    pub fn set_io_stream_kind(&mut self, kind: IoStreamKind) -> bool {
        if self.locked {
            crate::log::com_error(crate::log::ErrCode::Drop, "io_stream_kind is write protected");
            return false;
        }
        self.io_stream_kind = kind;
        true
    }

    pub fn set_baseline_cache_capacity(&mut self, capacity: usize) -> bool {
        if self.locked {
            crate::log::com_error(crate::log::ErrCode::Drop, "baseline_cache_capacity is write protected");
            return false;
        }
        self.baseline_cache_capacity = capacity;
        true
    }
}

/// Process-wide config singleton, set once at startup. Mirrors the
/// original's single global `CvarContext`, minus the console commands.
static ENGINE_CONFIG: RwLock<Option<EngineConfig>> = RwLock::new(None);

pub fn config_init(config: EngineConfig) {
    *ENGINE_CONFIG.write().unwrap() = Some(config);
}

pub fn with_config<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&EngineConfig) -> R,
{
    ENGINE_CONFIG.read().unwrap().as_ref().map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_protocol_constants() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.command_ring_capacity, 3);
        assert_eq!(cfg.io_stream_kind, IoStreamKind::Raw);
    }

    #[test]
    fn locked_config_rejects_overrides() {
        let mut cfg = EngineConfig::new();
        cfg.lock();
        assert!(!cfg.set_io_stream_kind(IoStreamKind::Huffman));
        assert_eq!(cfg.io_stream_kind, IoStreamKind::Raw);
    }

    #[test]
    fn unlocked_config_accepts_overrides() {
        let mut cfg = EngineConfig::new();
        assert!(cfg.set_baseline_cache_capacity(64));
        assert_eq!(cfg.baseline_cache_capacity, 64);
    }
}
