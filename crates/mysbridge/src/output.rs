//! Human-readable output for `mysbridge check`.

use std::io::{self, IsTerminal};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use mysbridge_core::{
    BindingRole, BridgeConfig, Consistency, EntityBinding, IdAssignment, LinkConfig, SensorClass,
};

use crate::cli::ColorMode;

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Gateways ─────────────────────────────────────────────────────────

/// One line per gateway: name, link, id range, assignment, passthrough.
pub fn gateway_summary(config: &BridgeConfig, color: bool) -> String {
    config
        .gateways
        .iter()
        .map(|gw| {
            let link = match &gw.link {
                LinkConfig::Ethernet { host, port } => format!("tcp://{host}:{port}"),
                LinkConfig::Serial { device, baud_rate } => format!("{device} @ {baud_rate} baud"),
            };
            let assignment = match gw.assignment {
                IdAssignment::Sequential => "sequential",
                IdAssignment::Random => "random",
            };
            let passthrough = gw
                .passthrough_port
                .map_or_else(String::new, |port| format!(", passthrough :{port}"));
            let name = if color {
                gw.name.bold().to_string()
            } else {
                gw.name.clone()
            };
            format!(
                "{name}: {link}, ids {}..={} ({assignment}){passthrough}",
                gw.node_ids.start(),
                gw.node_ids.end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Bindings ─────────────────────────────────────────────────────────

#[derive(Tabled)]
struct BindingRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Gateway")]
    gateway: String,
    #[tabled(rename = "Node")]
    node: u8,
    #[tabled(rename = "Child")]
    child: u8,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Variable")]
    variable: String,
    #[tabled(rename = "Role")]
    role: &'static str,
    #[tabled(rename = "Access")]
    access: &'static str,
    #[tabled(rename = "Mode")]
    mode: &'static str,
}

impl From<&EntityBinding> for BindingRow {
    fn from(b: &EntityBinding) -> Self {
        let role = match b.role {
            BindingRole::Relay => "relay",
            BindingRole::Sensor(SensorClass::Binary) => "binary sensor",
            BindingRole::Sensor(SensorClass::Numeric) => "sensor",
        };
        let access = match (b.readable, b.writable) {
            (true, true) => "rw",
            (true, false) => "ro",
            (false, true) => "wo",
            (false, false) => "-",
        };
        let mode = match b.consistency {
            Consistency::Optimistic => "optimistic",
            Consistency::Confirmed => "confirmed",
        };
        Self {
            entity: b.key.to_string(),
            gateway: b.gateway.clone(),
            node: b.node_id,
            child: b.child_id,
            kind: b.kind.to_string(),
            variable: b.variable.name(),
            role,
            access,
            mode,
        }
    }
}

pub fn binding_table(bindings: &[EntityBinding]) -> String {
    let rows: Vec<BindingRow> = bindings.iter().map(BindingRow::from).collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Closing status line.
pub fn verdict(bindings: usize, gateways: usize, color: bool) -> String {
    let mark = if color {
        "✓".green().to_string()
    } else {
        "✓".to_owned()
    };
    format!("{mark} configuration is valid: {gateways} gateway(s), {bindings} entity binding(s)")
}

#[cfg(test)]
mod tests {
    use mysbridge_core::{
        BridgeConfig, DeviceConfig, EntityConfig, EntityKind, GatewayConfig, bindings_from_config,
    };

    use super::*;

    fn config() -> BridgeConfig {
        BridgeConfig {
            gateways: vec![GatewayConfig {
                passthrough_port: Some(5004),
                ..GatewayConfig::ethernet("default", "10.0.0.5", 5003)
            }],
            bus: mysbridge_core::BusConfig::default(),
            adapter: mysbridge_core::AdapterConfig::default(),
            devices: vec![DeviceConfig {
                id: "hall".into(),
                name: "Hall".into(),
                node_id: 3,
                entities: vec![
                    EntityConfig::new("lamp", EntityKind::Switch, 1),
                    EntityConfig::new("door", EntityKind::BinarySensor, 2),
                ],
                ..DeviceConfig::default()
            }],
        }
    }

    #[test]
    fn summary_names_link_and_range() {
        let summary = gateway_summary(&config(), false);
        assert_eq!(
            summary,
            "default: tcp://10.0.0.5:5003, ids 1..=254 (sequential), passthrough :5004"
        );
    }

    #[test]
    fn table_lists_every_binding() {
        let bindings = bindings_from_config(&config());
        let table = binding_table(&bindings);
        assert!(table.contains("hall/lamp"));
        assert!(table.contains("V_STATUS"));
        assert!(table.contains("binary sensor"));
        assert!(table.contains("confirmed"));
    }
}
