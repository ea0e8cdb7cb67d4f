//! Shared setup for integration tests
//!
//! Every store is a fresh in-memory SQLite database holding the subnet,
//! audit and id generator tables.

#![allow(dead_code)]

use std::sync::Arc;

use dalcore::resource::{GcpSubnetExtension, Subnet, SubnetExtension, Vendor};
use dalcore::{DalConfig, SqliteOrm, TableAudit, TableDao, TableIdGenerator};

pub const SUBNET_DDL: &str = "CREATE TABLE subnet (
    id TEXT PRIMARY KEY,
    vendor TEXT NOT NULL,
    cloud_id TEXT NOT NULL,
    cloud_vpc_id TEXT NOT NULL,
    name TEXT,
    region TEXT NOT NULL,
    zone TEXT,
    ipv4_cidr TEXT,
    bk_biz_id INTEGER NOT NULL DEFAULT -1,
    memo TEXT,
    extension TEXT,
    tenant_id TEXT,
    creator TEXT NOT NULL,
    reviser TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (vendor, cloud_id)
);";

pub const AUDIT_DDL: &str = "CREATE TABLE audit (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    res_id TEXT NOT NULL,
    cloud_res_id TEXT,
    res_name TEXT,
    res_type TEXT NOT NULL,
    action TEXT NOT NULL,
    operator TEXT NOT NULL,
    rid TEXT,
    app_code TEXT,
    tenant_id TEXT,
    detail TEXT,
    created_at TEXT
);";

pub const ID_GENERATOR_DDL: &str =
    "CREATE TABLE id_generator (resource TEXT PRIMARY KEY, max_id INTEGER NOT NULL);";

/// Fresh store with every table created
pub fn setup_store(config: &DalConfig) -> SqliteOrm {
    let orm = SqliteOrm::open_in_memory(config.clone()).unwrap();
    orm.with_connection(|conn| {
        conn.execute_batch(SUBNET_DDL)?;
        conn.execute_batch(AUDIT_DDL)?;
        conn.execute_batch(ID_GENERATOR_DDL)
    })
    .unwrap();
    orm
}

/// Subnet DAO over a fresh store
pub fn setup_dao(config: DalConfig) -> (SqliteOrm, TableDao<Subnet>) {
    let orm = setup_store(&config);
    let dao = TableDao::new(
        Arc::new(orm.clone()),
        Arc::new(TableIdGenerator::new()),
        Arc::new(TableAudit::new()),
        config,
    )
    .unwrap();
    (orm, dao)
}

pub fn gcp_subnet(cloud_id: &str, name: &str) -> Subnet {
    Subnet {
        vendor: Some(Vendor::Gcp),
        cloud_id: cloud_id.to_string(),
        cloud_vpc_id: "vpc-1".to_string(),
        name: name.to_string(),
        region: "us-east1".to_string(),
        ipv4_cidr: vec!["10.0.0.0/24".to_string()],
        bk_biz_id: 100,
        extension: Some(SubnetExtension::Gcp(GcpSubnetExtension {
            self_link: format!("projects/p/regions/us-east1/subnetworks/{}", name),
            ..Default::default()
        })),
        ..Default::default()
    }
}

/// Number of rows in a table
pub fn count_rows(orm: &SqliteOrm, table: &str) -> i64 {
    orm.with_connection(|conn| {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
    })
    .unwrap()
}
