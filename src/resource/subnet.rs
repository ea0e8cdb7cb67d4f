//! Subnet table
//!
//! The `extension` column holds a vendor-specific document. It decodes into
//! a closed `SubnetExtension` using the `vendor` column as discriminator; a
//! document that does not fit its vendor's shape is rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Vendor;
use crate::errors::{DalError, DalResult};
use crate::table::{
    declare, ColumnDescriptor, ColumnSet, ColumnType, DeclaredColumns, Record, Row,
};

pub const SUBNET_TABLE: &str = "subnet";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TCloudSubnetExtension {
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub cloud_network_acl_id: Option<String>,
    #[serde(default)]
    pub cloud_route_table_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AwsSubnetExtension {
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub map_public_ip_on_launch: bool,
    #[serde(default)]
    pub cloud_route_table_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpSubnetExtension {
    pub self_link: String,
    #[serde(default)]
    pub stack_type: String,
    #[serde(default)]
    pub private_ip_google_access: bool,
    #[serde(default)]
    pub enable_flow_logs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureSubnetExtension {
    pub resource_group_name: String,
    #[serde(default)]
    pub cloud_security_group_id: Option<String>,
    #[serde(default)]
    pub nat_gateway: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HuaWeiSubnetExtension {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub dhcp_enable: bool,
    #[serde(default)]
    pub gateway_ip: String,
    #[serde(default)]
    pub neutron_subnet_id: String,
}

/// Vendor-specific subnet attributes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SubnetExtension {
    TCloud(TCloudSubnetExtension),
    Aws(AwsSubnetExtension),
    Gcp(GcpSubnetExtension),
    Azure(AzureSubnetExtension),
    HuaWei(HuaWeiSubnetExtension),
}

impl SubnetExtension {
    /// Decode a stored document for `vendor`
    pub fn decode(vendor: Vendor, value: Value) -> Result<Self, serde_json::Error> {
        Ok(match vendor {
            Vendor::TCloud => SubnetExtension::TCloud(serde_json::from_value(value)?),
            Vendor::Aws => SubnetExtension::Aws(serde_json::from_value(value)?),
            Vendor::Gcp => SubnetExtension::Gcp(serde_json::from_value(value)?),
            Vendor::Azure => SubnetExtension::Azure(serde_json::from_value(value)?),
            Vendor::HuaWei => SubnetExtension::HuaWei(serde_json::from_value(value)?),
        })
    }

    pub fn vendor(&self) -> Vendor {
        match self {
            SubnetExtension::TCloud(_) => Vendor::TCloud,
            SubnetExtension::Aws(_) => Vendor::Aws,
            SubnetExtension::Gcp(_) => Vendor::Gcp,
            SubnetExtension::Azure(_) => Vendor::Azure,
            SubnetExtension::HuaWei(_) => Vendor::HuaWei,
        }
    }

    /// The vendor's own handle for the subnet's placement, where it has one
    pub fn cloud_identity(&self) -> Option<&str> {
        match self {
            SubnetExtension::TCloud(ext) => ext.cloud_route_table_id.as_deref(),
            SubnetExtension::Aws(ext) => ext.cloud_route_table_id.as_deref(),
            SubnetExtension::Gcp(ext) => Some(ext.self_link.as_str()),
            SubnetExtension::Azure(ext) => Some(ext.resource_group_name.as_str()),
            SubnetExtension::HuaWei(ext) => {
                Some(ext.neutron_subnet_id.as_str()).filter(|id| !id.is_empty())
            }
        }
    }
}

/// A subnet row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SubnetRow", into = "SubnetRow<SubnetExtension>")]
pub struct Subnet {
    pub id: String,
    pub vendor: Option<Vendor>,
    pub cloud_id: String,
    pub cloud_vpc_id: String,
    pub name: String,
    pub region: String,
    pub zone: String,
    pub ipv4_cidr: Vec<String>,
    pub bk_biz_id: i64,
    pub memo: Option<String>,
    pub extension: Option<SubnetExtension>,
    pub creator: String,
    pub reviser: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Flat storage shape of `Subnet`. Stored extensions are read as raw JSON
/// since their shape depends on `vendor`.
#[derive(Serialize, Deserialize)]
struct SubnetRow<E = Value> {
    #[serde(default)]
    id: String,
    #[serde(default)]
    vendor: Option<Vendor>,
    #[serde(default)]
    cloud_id: String,
    #[serde(default)]
    cloud_vpc_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    ipv4_cidr: Option<Vec<String>>,
    #[serde(default)]
    bk_biz_id: i64,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    extension: Option<E>,
    #[serde(default)]
    creator: String,
    #[serde(default)]
    reviser: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    updated_at: String,
}

impl TryFrom<SubnetRow> for Subnet {
    type Error = String;

    fn try_from(row: SubnetRow) -> Result<Self, Self::Error> {
        let extension = match (row.vendor, row.extension) {
            (_, None) | (_, Some(Value::Null)) => None,
            (Some(vendor), Some(value)) => Some(
                SubnetExtension::decode(vendor, value)
                    .map_err(|e| format!("{} subnet extension: {}", vendor, e))?,
            ),
            (None, Some(_)) => return Err("subnet extension without vendor".to_string()),
        };

        Ok(Subnet {
            id: row.id,
            vendor: row.vendor,
            cloud_id: row.cloud_id,
            cloud_vpc_id: row.cloud_vpc_id,
            name: row.name,
            region: row.region,
            zone: row.zone,
            ipv4_cidr: row.ipv4_cidr.unwrap_or_default(),
            bk_biz_id: row.bk_biz_id,
            memo: row.memo,
            extension,
            creator: row.creator,
            reviser: row.reviser,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<Subnet> for SubnetRow<SubnetExtension> {
    fn from(subnet: Subnet) -> Self {
        SubnetRow {
            id: subnet.id,
            vendor: subnet.vendor,
            cloud_id: subnet.cloud_id,
            cloud_vpc_id: subnet.cloud_vpc_id,
            name: subnet.name,
            region: subnet.region,
            zone: subnet.zone,
            ipv4_cidr: Some(subnet.ipv4_cidr),
            bk_biz_id: subnet.bk_biz_id,
            memo: subnet.memo,
            extension: subnet.extension,
            creator: subnet.creator,
            reviser: subnet.reviser,
            created_at: subnet.created_at,
            updated_at: subnet.updated_at,
        }
    }
}

impl Subnet {
    /// The extension must belong to the record's vendor
    fn check_extension(&self) -> DalResult<()> {
        match (&self.vendor, &self.extension) {
            (Some(vendor), Some(ext)) if ext.vendor() != *vendor => Err(DalError::validation(
                format!("{} extension does not match vendor {}", ext.vendor(), vendor),
            )),
            _ => Ok(()),
        }
    }

    /// Vendor of a stored row, keyed by bind name
    fn stored_vendor(stored: &Row) -> DalResult<Vendor> {
        stored
            .get("vendor")
            .and_then(Value::as_str)
            .ok_or_else(|| DalError::internal("stored subnet has no vendor"))?
            .parse()
            .map_err(|e| DalError::internal(format!("stored subnet: {}", e)))
    }
}

static SUBNET_COLUMNS: DeclaredColumns = DeclaredColumns::new();

impl Record for Subnet {
    fn table_name() -> &'static str {
        SUBNET_TABLE
    }

    fn columns() -> DalResult<&'static ColumnSet> {
        declare(&SUBNET_COLUMNS, || {
            ColumnSet::new([
                ColumnDescriptor::string("id"),
                ColumnDescriptor::string("vendor").required().immutable(),
                ColumnDescriptor::string("cloud_id").required().immutable(),
                ColumnDescriptor::string("cloud_vpc_id").required(),
                ColumnDescriptor::string("name").max_len(255),
                ColumnDescriptor::string("region").required(),
                ColumnDescriptor::string("zone"),
                ColumnDescriptor::json("ipv4_cidr"),
                ColumnDescriptor::numeric("bk_biz_id"),
                ColumnDescriptor::string("memo").max_len(255),
                ColumnDescriptor::json("extension"),
                ColumnDescriptor::string("creator"),
                ColumnDescriptor::string("reviser"),
                ColumnDescriptor::time("created_at"),
                ColumnDescriptor::time("updated_at"),
            ])
        })
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn cloud_id(&self) -> Option<&str> {
        Some(self.cloud_id.as_str())
    }

    fn name(&self) -> Option<&str> {
        Some(self.name.as_str())
    }

    fn extra_rule_fields() -> Vec<(String, ColumnType)> {
        vec![
            ("extension.self_link".to_string(), ColumnType::String),
            ("extension.resource_group_name".to_string(), ColumnType::String),
            ("extension.is_default".to_string(), ColumnType::Boolean),
        ]
    }

    fn validate_insert(&self) -> DalResult<()> {
        let columns = Self::columns()?;
        columns.validate_insert(&columns.encode(self)?)?;
        if self.extension.is_none() {
            return Err(DalError::validation("extension is required"));
        }
        self.check_extension()
    }

    fn validate_update(&self) -> DalResult<()> {
        let columns = Self::columns()?;
        columns.validate_update(&columns.encode(self)?)?;
        self.check_extension()
    }

    fn stored_check_fields() -> &'static [&'static str] {
        &["vendor"]
    }

    /// A new extension must fit the vendor already stored
    fn validate_stored(&self, stored: &Row) -> DalResult<()> {
        let Some(ext) = &self.extension else {
            return Ok(());
        };
        let vendor = Self::stored_vendor(stored)?;
        if ext.vendor() != vendor {
            return Err(DalError::validation(format!(
                "{} extension does not match stored vendor {}",
                ext.vendor(),
                vendor
            )));
        }
        Ok(())
    }
}
