//! # Resources
//!
//! Concrete tables built on the engine. Each resource declares its columns
//! once and plugs into `TableDao`.

pub mod subnet;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DalError;

pub use subnet::{
    AwsSubnetExtension, AzureSubnetExtension, GcpSubnetExtension, HuaWeiSubnetExtension, Subnet,
    SubnetExtension, TCloudSubnetExtension, SUBNET_TABLE,
};

/// Cloud vendor a resource lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    TCloud,
    Aws,
    Gcp,
    Azure,
    HuaWei,
}

impl Vendor {
    pub const ALL: [Vendor; 5] = [
        Vendor::TCloud,
        Vendor::Aws,
        Vendor::Gcp,
        Vendor::Azure,
        Vendor::HuaWei,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::TCloud => "tcloud",
            Vendor::Aws => "aws",
            Vendor::Gcp => "gcp",
            Vendor::Azure => "azure",
            Vendor::HuaWei => "huawei",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Vendor {
    type Err = DalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Vendor::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| DalError::invalid_parameter(format!("unknown vendor: {}", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_round_trip() {
        for vendor in Vendor::ALL {
            assert_eq!(vendor.as_str().parse::<Vendor>().unwrap(), vendor);
            assert_eq!(
                serde_json::to_value(vendor).unwrap(),
                serde_json::Value::String(vendor.to_string())
            );
        }
        assert!("openstack".parse::<Vendor>().is_err());
    }
}
