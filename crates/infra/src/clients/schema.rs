//! Storefront schema seeded into every tenant database.

use shopforge_core::{DatabaseName, MerchantId};

use super::{ClientError, ClientResult};

/// Name of the database provisioned for `merchant_id`. Always a valid unquoted
/// Postgres identifier (39 chars, `[a-z0-9_]`).
pub fn tenant_database_name(merchant_id: MerchantId) -> ClientResult<DatabaseName> {
    DatabaseName::parse(format!("tenant_{}", merchant_id.as_uuid().simple()))
        .map_err(|e| ClientError::Validation(e.to_string()))
}

/// A storefront collection (a table in the Postgres provisioner).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionDef {
    pub name: &'static str,
    /// `(column, sql type)` pairs besides the common `id`, `data`, `created_at`.
    pub columns: &'static [(&'static str, &'static str)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub collection: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl IndexDef {
    pub fn name(&self) -> String {
        let suffix = if self.unique { "key" } else { "idx" };
        format!("{}_{}_{}", self.collection, self.columns.join("_"), suffix)
    }
}

pub const STOREFRONT_COLLECTIONS: &[CollectionDef] = &[
    CollectionDef {
        name: "products",
        columns: &[("slug", "TEXT NOT NULL"), ("category_id", "UUID")],
    },
    CollectionDef {
        name: "categories",
        columns: &[("slug", "TEXT NOT NULL")],
    },
    CollectionDef {
        name: "customers",
        columns: &[("email", "TEXT NOT NULL")],
    },
    CollectionDef {
        name: "orders",
        columns: &[("customer_id", "UUID NOT NULL")],
    },
    CollectionDef {
        name: "carts",
        columns: &[("customer_id", "UUID")],
    },
    CollectionDef {
        name: "settings",
        columns: &[("key", "TEXT NOT NULL")],
    },
];

pub const STOREFRONT_INDEXES: &[IndexDef] = &[
    IndexDef {
        collection: "products",
        columns: &["slug"],
        unique: true,
    },
    IndexDef {
        collection: "products",
        columns: &["category_id"],
        unique: false,
    },
    IndexDef {
        collection: "categories",
        columns: &["slug"],
        unique: true,
    },
    IndexDef {
        collection: "customers",
        columns: &["email"],
        unique: true,
    },
    IndexDef {
        collection: "orders",
        columns: &["customer_id"],
        unique: false,
    },
    IndexDef {
        collection: "orders",
        columns: &["created_at"],
        unique: false,
    },
    IndexDef {
        collection: "carts",
        columns: &["customer_id"],
        unique: false,
    },
    IndexDef {
        collection: "settings",
        columns: &["key"],
        unique: true,
    },
];

pub fn collection_names() -> Vec<String> {
    STOREFRONT_COLLECTIONS
        .iter()
        .map(|c| c.name.to_string())
        .collect()
}
