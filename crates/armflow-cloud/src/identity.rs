//! Resource kinds and identities
//!
//! A [`ResourceKind`] carries everything the engine needs to know about a
//! resource type: its ARM provider type, the parent qualifiers that appear in
//! its path, the API version to call, how to generate a name for it, and
//! whether its API tolerates repeated submission of the same payload.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};

const RESOURCES_API_VERSION: &str = "2021-04-01";
const STORAGE_API_VERSION: &str = "2023-01-01";
const NETWORK_API_VERSION: &str = "2023-09-01";
const COMPUTE_API_VERSION: &str = "2023-09-01";
const CONTAINER_SERVICE_API_VERSION: &str = "2024-02-01";

/// How a name is generated when none is declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingRule {
    /// Lowercase alphanumeric, at most `max_len` characters (storage accounts)
    Compact { max_len: usize },
    /// Random token (hyphenated UUID)
    Token,
}

/// Resource type, tagged with the parent qualifiers it needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    ResourceGroup,
    StorageAccount,
    VirtualNetwork,
    Subnet { virtual_network: String },
    NetworkSecurityGroup,
    SecurityRule { security_group: String },
    NetworkInterface,
    PublicIpAddress,
    VirtualMachine,
    VmExtension { virtual_machine: String },
    AvailabilitySet,
    LoadBalancer,
    BackendPool { load_balancer: String },
    ManagedCluster,
    Deployment,
    Generic {
        provider_type: String,
        api_version: String,
    },
}

impl ResourceKind {
    /// ARM provider type, e.g. `Microsoft.Network/virtualNetworks/subnets`
    pub fn provider_type(&self) -> &str {
        match self {
            ResourceKind::ResourceGroup => "Microsoft.Resources/resourceGroups",
            ResourceKind::StorageAccount => "Microsoft.Storage/storageAccounts",
            ResourceKind::VirtualNetwork => "Microsoft.Network/virtualNetworks",
            ResourceKind::Subnet { .. } => "Microsoft.Network/virtualNetworks/subnets",
            ResourceKind::NetworkSecurityGroup => "Microsoft.Network/networkSecurityGroups",
            ResourceKind::SecurityRule { .. } => {
                "Microsoft.Network/networkSecurityGroups/securityRules"
            }
            ResourceKind::NetworkInterface => "Microsoft.Network/networkInterfaces",
            ResourceKind::PublicIpAddress => "Microsoft.Network/publicIPAddresses",
            ResourceKind::VirtualMachine => "Microsoft.Compute/virtualMachines",
            ResourceKind::VmExtension { .. } => "Microsoft.Compute/virtualMachines/extensions",
            ResourceKind::AvailabilitySet => "Microsoft.Compute/availabilitySets",
            ResourceKind::LoadBalancer => "Microsoft.Network/loadBalancers",
            ResourceKind::BackendPool { .. } => {
                "Microsoft.Network/loadBalancers/backendAddressPools"
            }
            ResourceKind::ManagedCluster => "Microsoft.ContainerService/managedClusters",
            ResourceKind::Deployment => "Microsoft.Resources/deployments",
            ResourceKind::Generic { provider_type, .. } => provider_type,
        }
    }

    pub fn api_version(&self) -> &str {
        match self {
            ResourceKind::ResourceGroup | ResourceKind::Deployment => RESOURCES_API_VERSION,
            ResourceKind::StorageAccount => STORAGE_API_VERSION,
            ResourceKind::VirtualNetwork
            | ResourceKind::Subnet { .. }
            | ResourceKind::NetworkSecurityGroup
            | ResourceKind::SecurityRule { .. }
            | ResourceKind::NetworkInterface
            | ResourceKind::PublicIpAddress
            | ResourceKind::LoadBalancer
            | ResourceKind::BackendPool { .. } => NETWORK_API_VERSION,
            ResourceKind::VirtualMachine
            | ResourceKind::VmExtension { .. }
            | ResourceKind::AvailabilitySet => COMPUTE_API_VERSION,
            ResourceKind::ManagedCluster => CONTAINER_SERVICE_API_VERSION,
            ResourceKind::Generic { api_version, .. } => api_version,
        }
    }

    /// Name of the parent resource for child kinds
    pub fn parent(&self) -> Option<&str> {
        match self {
            ResourceKind::Subnet { virtual_network } => Some(virtual_network),
            ResourceKind::SecurityRule { security_group } => Some(security_group),
            ResourceKind::VmExtension { virtual_machine } => Some(virtual_machine),
            ResourceKind::BackendPool { load_balancer } => Some(load_balancer),
            _ => None,
        }
    }

    pub fn naming_rule(&self) -> NamingRule {
        match self {
            ResourceKind::StorageAccount => NamingRule::Compact { max_len: 24 },
            _ => NamingRule::Token,
        }
    }

    /// Whether repeated `create_or_update` with the same payload reconciles in place
    pub fn is_idempotent(&self) -> bool {
        matches!(self, ResourceKind::Deployment)
    }

    /// Short label used in logs and error messages
    pub fn label(&self) -> &str {
        self.provider_type()
            .rsplit('/')
            .next()
            .unwrap_or_else(|| self.provider_type())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.parent() {
            Some(parent) => write!(f, "{} (in {})", self.provider_type(), parent),
            None => write!(f, "{}", self.provider_type()),
        }
    }
}

/// Identity of a resource; `name` may be unresolved at declaration time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentity {
    pub kind: ResourceKind,

    /// Owning resource group; `None` only for resource groups themselves
    pub resource_group: Option<String>,

    pub name: Option<String>,
}

impl ResourceIdentity {
    pub fn new(
        kind: ResourceKind,
        resource_group: Option<String>,
        name: Option<String>,
    ) -> Self {
        Self {
            kind,
            resource_group,
            name: name.filter(|n| !n.is_empty()),
        }
    }

    /// Same kind and group, with a different name
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        Self {
            kind: self.kind.clone(),
            resource_group: self.resource_group.clone(),
            name: Some(name.into()),
        }
    }

    pub fn name(&self) -> Result<&str> {
        self.name
            .as_deref()
            .ok_or_else(|| CloudError::InvalidConfig(format!("{} has no name", self.kind)))
    }

    fn group(&self) -> Result<&str> {
        self.resource_group.as_deref().ok_or_else(|| {
            CloudError::InvalidConfig(format!("{} requires a resource group", self.kind))
        })
    }

    /// ARM path relative to the management endpoint
    pub fn resource_path(&self, subscription_id: &str) -> Result<String> {
        let name = self.name()?;

        if self.kind == ResourceKind::ResourceGroup {
            return Ok(format!(
                "/subscriptions/{}/resourcegroups/{}",
                subscription_id, name
            ));
        }

        let group = self.group()?;
        let mut segments = self.kind.provider_type().split('/');
        let namespace = segments.next().unwrap_or_default();
        let types: Vec<&str> = segments.collect();

        let mut path = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}",
            subscription_id, group, namespace
        );
        match (self.kind.parent(), types.as_slice()) {
            (Some(parent), [parent_type, child_type]) => {
                path.push_str(&format!("/{}/{}/{}/{}", parent_type, parent, child_type, name));
            }
            _ => {
                for t in &types {
                    path.push('/');
                    path.push_str(t);
                }
                path.push('/');
                path.push_str(name);
            }
        }
        Ok(path)
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = self.name.as_deref().unwrap_or("<unnamed>");
        match &self.resource_group {
            Some(group) => write!(f, "{}/{} [{}]", group, name, self.kind.label()),
            None => write!(f, "{} [{}]", name, self.kind.label()),
        }
    }
}
