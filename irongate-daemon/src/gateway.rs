//! Gateway assembly -- wires the hook dispatcher, NAT engine and QoS engine
//! into the five packet-path entry points.
//!
//! # Packet path
//!
//! | Entry point   | Steps                                                     |
//! |---------------|-----------------------------------------------------------|
//! | `prerouting`  | PreRouting hooks, then NAT reply translation (WAN only)   |
//! | `local_in`    | LocalIn hooks                                             |
//! | `forward`     | Forward hooks                                             |
//! | `local_out`   | LocalOut hooks                                            |
//! | `postrouting` | PostRouting hooks, NAT forward translation, QoS enqueue   |
//! | `transmit`    | strict-priority dequeue                                   |
//!
//! NAT and QoS are invoked directly and are not entries in the hook chains.
//! A disabled NAT section skips translation; a disabled QoS section skips
//! classification and queues everything as best-effort. When
//! `[nat] wan_interface` is set, reply translation is only attempted for
//! packets received on that interface.

use std::sync::Arc;

use irongate_core::config::IronGateConfig;
use irongate_core::error::IronGateError;
use irongate_core::packet::{NetDevice, Packet};
use irongate_hook::{HookDispatcher, HookPoint, HookStats, Verdict};
use irongate_nat::{NatEngine, NatStats};
use irongate_qos::{ClassId, EnqueueOutcome, QosEngine, QosStats};
use serde::Serialize;

/// Result of handing a packet to [`Gateway::postrouting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Egress {
    /// Queued for transmission in the given class.
    Queued(ClassId),
    /// The class queue was full and the packet was dropped.
    TailDropped(ClassId),
    /// A PostRouting hook ended the chain with a non-accept verdict.
    Rejected(Verdict),
}

/// Number of rules loaded from the configured rule files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadedRules {
    pub nat: usize,
    pub qos: usize,
}

/// Serializable snapshot of every subsystem's counters.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub hooks: Vec<HookPointStatus>,
    pub nat: Option<NatStats>,
    pub qos: Option<QosStats>,
}

/// Per-hook-point counters with the number of registered hooks.
#[derive(Debug, Clone, Serialize)]
pub struct HookPointStatus {
    pub point: &'static str,
    pub registered: usize,
    #[serde(flatten)]
    pub stats: HookStats,
}

/// Owns the three packet-path subsystems.
pub struct Gateway {
    hooks: HookDispatcher,
    nat: Arc<NatEngine>,
    qos: QosEngine,
    nat_enabled: bool,
    wan_interface: Option<String>,
    qos_enabled: bool,
}

impl Gateway {
    /// Build all subsystems from configuration. No rules are loaded.
    pub fn new(config: &IronGateConfig) -> Self {
        Self {
            hooks: HookDispatcher::from_config(&config.hook),
            nat: Arc::new(NatEngine::from_config(&config.nat)),
            qos: QosEngine::from_config(&config.qos),
            nat_enabled: config.nat.enabled,
            wan_interface: config.nat.wan_interface.clone(),
            qos_enabled: config.qos.enabled,
        }
    }

    /// Load the NAT and QoS rule files named in the configuration.
    ///
    /// Rules are added in file order, so the last rule of a file is matched first.
    /// Sections that are disabled or have no `rules_path` are skipped.
    pub async fn load_rule_files(&self, config: &IronGateConfig) -> Result<LoadedRules, IronGateError> {
        let mut loaded = LoadedRules::default();

        if let Some(path) = config.nat.rules_path.as_deref().filter(|_| self.nat_enabled) {
            for rule in irongate_nat::load_rules(path).await? {
                self.nat.add_rule(rule)?;
                loaded.nat += 1;
            }
            tracing::info!(path, rules = loaded.nat, "nat rules loaded");
        }

        if let Some(path) = config.qos.rules_path.as_deref().filter(|_| self.qos_enabled) {
            for rule in irongate_qos::load_rules(path).await? {
                self.qos.add_rule(rule)?;
                loaded.qos += 1;
            }
            tracing::info!(path, rules = loaded.qos, "qos rules loaded");
        }

        Ok(loaded)
    }

    pub fn hooks(&self) -> &HookDispatcher {
        &self.hooks
    }

    pub fn nat(&self) -> &Arc<NatEngine> {
        &self.nat
    }

    pub fn qos(&self) -> &QosEngine {
        &self.qos
    }

    pub fn nat_enabled(&self) -> bool {
        self.nat_enabled
    }

    // ─── packet path ────────────────────────────────────────────────

    /// Ingress: PreRouting hooks, then reverse NAT for reply traffic arriving
    /// on the WAN interface.
    pub fn prerouting(&self, packet: &mut Packet, in_dev: &NetDevice) -> Verdict {
        let verdict = self
            .hooks
            .invoke(HookPoint::PreRouting, packet, Some(in_dev), None);
        if verdict == Verdict::Accept && self.nat_enabled && self.is_wan(in_dev) {
            self.nat.translate_inbound(packet);
        }
        verdict
    }

    fn is_wan(&self, dev: &NetDevice) -> bool {
        self.wan_interface
            .as_deref()
            .is_none_or(|wan| wan == dev.name)
    }

    /// Packets addressed to this host.
    pub fn local_in(&self, packet: &mut Packet, in_dev: &NetDevice) -> Verdict {
        self.hooks
            .invoke(HookPoint::LocalIn, packet, Some(in_dev), None)
    }

    /// Packets routed through this host.
    pub fn forward(&self, packet: &mut Packet, in_dev: &NetDevice, out_dev: &NetDevice) -> Verdict {
        self.hooks
            .invoke(HookPoint::Forward, packet, Some(in_dev), Some(out_dev))
    }

    /// Locally generated packets.
    pub fn local_out(&self, packet: &mut Packet, out_dev: &NetDevice) -> Verdict {
        self.hooks
            .invoke(HookPoint::LocalOut, packet, None, Some(out_dev))
    }

    /// Egress: PostRouting hooks, forward NAT, classification and enqueue.
    ///
    /// The packet is consumed unless the hooks reject it, in which case it is
    /// released here.
    pub fn postrouting(&self, mut packet: Packet, out_dev: &NetDevice) -> Egress {
        let verdict = self
            .hooks
            .invoke(HookPoint::PostRouting, &mut packet, None, Some(out_dev));
        if verdict != Verdict::Accept {
            return Egress::Rejected(verdict);
        }

        if self.nat_enabled {
            self.nat.translate_outbound(&mut packet);
        }

        let class = if self.qos_enabled {
            self.qos.classify(&mut packet)
        } else {
            ClassId::BEST_EFFORT
        };
        match self.qos.enqueue(packet, class) {
            EnqueueOutcome::Queued => Egress::Queued(class),
            EnqueueOutcome::TailDropped => Egress::TailDropped(class),
        }
    }

    /// Next packet to put on the wire.
    pub fn transmit(&self) -> Option<Packet> {
        self.qos.dequeue()
    }

    // ─── status ─────────────────────────────────────────────────────

    /// Counter snapshot of every subsystem.
    pub fn status(&self) -> GatewayStatus {
        GatewayStatus {
            hooks: HookPoint::ALL
                .iter()
                .map(|&point| HookPointStatus {
                    point: point.as_str(),
                    registered: self.hooks.hook_count(point),
                    stats: self.hooks.stats(point),
                })
                .collect(),
            nat: self.nat_enabled.then(|| self.nat.stats()),
            qos: self.qos_enabled.then(|| self.qos.stats()),
        }
    }

    /// Human-readable NAT and QoS statistics, as logged at shutdown.
    pub fn dump_stats(&self) -> String {
        let mut out = String::new();
        if self.nat_enabled {
            out.push_str(&self.nat.dump_stats());
        }
        if self.qos_enabled {
            out.push_str(&self.qos.dump_stats());
        }
        out
    }
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(&IronGateConfig::default())
    }
}
