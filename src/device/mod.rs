//! Network device fan-out on top of the batch runner.
//!
//! A JSON [`Inventory`] of [`DeviceProfile`]s plus one [`DeviceOperation`] turns
//! into a batch with one work item per device, identified by host. The
//! [`SshExecutor`] performs each item over an interactive SSH shell:
//! connect, prepare the terminal, run the commands, disconnect.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_ssh2_tokio::{Config, ServerCheckMethod};
use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use russh::{ChannelMsg, Preferred};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::batch::{Executor, ItemContext, WorkItem};
use crate::config;
use crate::error::{BatchError, OperationError};

pub use platform::Platform;
pub use security::{ConnectionSecurityOptions, SecurityLevel};
pub use ssh::SshExecutor;

/// Connection details for one device, mirroring a Netmiko device dictionary.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DeviceProfile {
    /// Platform key such as `cisco_ios`, `cisco_xr`, `cisco_nxos`, `juniper_junos`.
    #[serde(default = "default_device_type")]
    pub device_type: String,
    pub host: String,
    pub username: String,
    pub password: String,
    /// Enable password, used when the device lands in user mode.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_device_type() -> String {
    "cisco_ios".to_string()
}

fn default_port() -> u16 {
    config::DEFAULT_SSH_PORT
}

impl DeviceProfile {
    /// `user@host:port`, used in logs and error messages.
    pub fn device_addr(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }

    pub fn platform(&self) -> &'static Platform {
        Platform::for_device_type(&self.device_type)
    }
}

impl fmt::Debug for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceProfile")
            .field("device_type", &self.device_type)
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"***")
            .field("secret", &self.secret.as_ref().map(|_| "***"))
            .field("port", &self.port)
            .finish()
    }
}

/// A set of devices addressed by one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Inventory {
    pub devices: Vec<DeviceProfile>,
}

impl Inventory {
    /// Parses either `{"devices": [...]}` or a bare JSON array of devices.
    ///
    /// The form is picked from the first token, so parse errors point at the
    /// offending field.
    pub fn from_json(json: &str) -> Result<Self, BatchError> {
        let parse_error =
            |e: serde_json::Error| BatchError::InventoryError(format!("parse inventory: {e}"));
        let inventory = if json.trim_start().starts_with('[') {
            Inventory {
                devices: serde_json::from_str(json).map_err(parse_error)?,
            }
        } else {
            serde_json::from_str(json).map_err(parse_error)?
        };
        inventory.validate()?;
        Ok(inventory)
    }

    /// Hosts must be non-empty and unique, since they identify batch results.
    pub fn validate(&self) -> Result<(), BatchError> {
        let mut seen = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            if device.host.trim().is_empty() {
                return Err(BatchError::InventoryError(format!(
                    "device[{i}] host is empty"
                )));
            }
            if device.username.trim().is_empty() {
                return Err(BatchError::InventoryError(format!(
                    "device[{i}] username is empty"
                )));
            }
            if !seen.insert(device.host.as_str()) {
                return Err(BatchError::InventoryError(format!(
                    "device[{i}] duplicate host {}",
                    device.host
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// What to do on each device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceOperation {
    /// Run read-only commands and return their output.
    Show { commands: Vec<String> },
    /// Enter configuration mode, apply the commands, commit where the platform
    /// needs it, and leave configuration mode.
    Configure { commands: Vec<String> },
}

impl DeviceOperation {
    pub fn commands(&self) -> &[String] {
        match self {
            DeviceOperation::Show { commands } | DeviceOperation::Configure { commands } => {
                commands
            }
        }
    }

    pub fn validate(&self) -> Result<(), BatchError> {
        if self.commands().is_empty() {
            return Err(BatchError::InventoryError(
                "operation has no commands".to_string(),
            ));
        }
        if let Some(i) = self.commands().iter().position(|c| c.trim().is_empty()) {
            return Err(BatchError::InventoryError(format!(
                "command[{i}] is empty"
            )));
        }
        Ok(())
    }
}

/// Payload of a device work item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceJob {
    pub profile: DeviceProfile,
    pub operation: DeviceOperation,
}

/// Builds one work item per device, identified by host.
pub fn device_batch(
    inventory: &Inventory,
    operation: &DeviceOperation,
    executor: Arc<dyn Executor<DeviceJob>>,
) -> Result<Vec<WorkItem<DeviceJob>>, BatchError> {
    inventory.validate()?;
    operation.validate()?;
    Ok(inventory
        .devices
        .iter()
        .map(|profile| {
            WorkItem::new(
                profile.host.clone(),
                DeviceJob {
                    profile: profile.clone(),
                    operation: operation.clone(),
                },
                executor.clone(),
            )
        })
        .collect())
}

mod platform;
mod security;
mod ssh;

#[cfg(test)]
mod tests {
    use super::*;

    const INVENTORY: &str = r#"{
        "devices": [
            {"device_type": "cisco_ios", "host": "10.10.20.48", "username": "developer", "password": "pw", "secret": "en"},
            {"device_type": "cisco_xr", "host": "10.10.10.35", "username": "developer", "password": "pw", "port": 2222}
        ]
    }"#;

    #[test]
    fn inventory_parses_wrapped_form_with_defaults() {
        let inventory = Inventory::from_json(INVENTORY).expect("parse inventory");
        assert_eq!(inventory.len(), 2);
        assert_eq!(inventory.devices[0].port, 22);
        assert_eq!(inventory.devices[1].port, 2222);
        assert_eq!(inventory.devices[1].secret, None);
        assert_eq!(inventory.devices[1].platform().name, "cisco_xr");
    }

    #[test]
    fn inventory_parses_bare_array_and_defaults_device_type() {
        let inventory =
            Inventory::from_json(r#"[{"host": "r1", "username": "u", "password": "p"}]"#)
                .expect("parse bare inventory");
        assert_eq!(inventory.devices[0].device_type, "cisco_ios");
        assert_eq!(inventory.devices[0].device_addr(), "u@r1:22");
    }

    #[test]
    fn inventory_parse_error_names_missing_field() {
        for json in [
            r#"{"devices": [{"host": "r1", "password": "p"}]}"#,
            r#"[{"host": "r1", "password": "p"}]"#,
        ] {
            let err = Inventory::from_json(json).expect_err("username missing");
            match err {
                BatchError::InventoryError(msg) => {
                    assert!(msg.contains("missing field `username`"), "{msg}")
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
    }

    #[test]
    fn inventory_rejects_duplicate_hosts() {
        let err = Inventory::from_json(
            r#"[{"host": "r1", "username": "u", "password": "p"},
                {"host": "r1", "username": "u", "password": "p"}]"#,
        )
        .expect_err("duplicate host");
        assert!(matches!(err, BatchError::InventoryError(_)));
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let inventory = Inventory::from_json(INVENTORY).expect("parse inventory");
        let rendered = format!("{:?}", inventory.devices[0]);
        assert!(rendered.contains("10.10.20.48"));
        assert!(!rendered.contains("\"pw\""));
        assert!(!rendered.contains("\"en\""));
    }

    #[test]
    fn operation_parses_tagged_json() {
        let op: DeviceOperation = serde_json::from_str(
            r#"{"kind": "configure", "commands": ["interface Loopback99", "no shutdown"]}"#,
        )
        .expect("parse operation");
        assert_eq!(op.commands().len(), 2);
        assert!(matches!(op, DeviceOperation::Configure { .. }));
    }

    #[test]
    fn operation_without_commands_is_rejected() {
        let op = DeviceOperation::Show { commands: vec![] };
        assert!(op.validate().is_err());
        let op = DeviceOperation::Show {
            commands: vec!["show version".to_string(), "  ".to_string()],
        };
        assert!(op.validate().is_err());
    }

    #[test]
    fn device_batch_builds_one_item_per_host() {
        let inventory = Inventory::from_json(INVENTORY).expect("parse inventory");
        let op = DeviceOperation::Show {
            commands: vec!["show clock".to_string()],
        };
        let items = device_batch(&inventory, &op, Arc::new(SshExecutor::new())).expect("items");
        let ids = items.iter().map(|i| i.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["10.10.20.48", "10.10.10.35"]);
        assert_eq!(items[1].payload.profile.port, 2222);
    }
}
