//! Static catalog of tenant codes ("empresas").
//!
//! Every tenant code maps to the physical ERP database its data lives in and
//! to the company parameter ERP stored procedures expect. Several codes may
//! point at the same physical database; the pool manager keys pools by the
//! database name so those codes share a pool.
//!
//! The catalog is fixed at compile time. There is no runtime registration
//! and an unknown code is always an error.

use std::collections::HashSet;
use std::fmt;

use crate::error::{DbError, DbResult};

/// One tenant code and the physical database it routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TenantEntry {
    /// Short tenant code, unique within a registry.
    pub code: &'static str,
    /// Physical database holding this tenant's ERP data.
    pub physical_database: &'static str,
    /// Company parameter passed to ERP stored procedures.
    pub erp_company_param: &'static str,
    /// Human readable label.
    pub display_name: &'static str,
}

impl TenantEntry {
    /// Create a new entry.
    pub const fn new(
        code: &'static str,
        physical_database: &'static str,
        erp_company_param: &'static str,
        display_name: &'static str,
    ) -> Self {
        Self {
            code,
            physical_database,
            erp_company_param,
            display_name,
        }
    }
}

impl fmt::Display for TenantEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.code, self.display_name)
    }
}

/// Tenants served by the portal. Codes 01..10 share five ERP databases.
pub const BUILTIN_TENANTS: &[TenantEntry] = &[
    TenantEntry::new("01", "ERP_NORTE", "NORTE01", "Grupo Norte"),
    TenantEntry::new("02", "ERP_NORTE", "NORTE02", "Norte Logistica"),
    TenantEntry::new("03", "ERP_CENTRO", "CENTRO01", "Comercial del Centro"),
    TenantEntry::new("04", "ERP_CENTRO", "CENTRO02", "Centro Distribucion"),
    TenantEntry::new("05", "ERP_OCCIDENTE", "OCC01", "Occidente Industrial"),
    TenantEntry::new("06", "ERP_OCCIDENTE", "OCC02", "Occidente Servicios"),
    TenantEntry::new("07", "ERP_SURESTE", "SUR01", "Sureste Agro"),
    TenantEntry::new("08", "ERP_SURESTE", "SUR02", "Sureste Puertos"),
    TenantEntry::new("09", "ERP_BAJIO", "BAJIO01", "Bajio Manufactura"),
    TenantEntry::new("10", "ERP_BAJIO", "BAJIO02", "Bajio Comercial"),
];

/// Lookup table from tenant code to [`TenantEntry`].
#[derive(Debug, Clone, Copy)]
pub struct TenantRegistry {
    entries: &'static [TenantEntry],
}

impl TenantRegistry {
    /// Create a registry over a static table.
    ///
    /// Fails if two entries share a code or if any field used for routing is
    /// empty.
    pub fn new(entries: &'static [TenantEntry]) -> DbResult<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in entries {
            if entry.code.is_empty() || entry.physical_database.is_empty() {
                return Err(DbError::config(format!(
                    "tenant entry '{}' has an empty code or database",
                    entry
                )));
            }
            if !seen.insert(entry.code) {
                return Err(DbError::config(format!(
                    "duplicate tenant code '{}'",
                    entry.code
                )));
            }
        }
        Ok(Self { entries })
    }

    /// The registry over [`BUILTIN_TENANTS`].
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_TENANTS,
        }
    }

    /// Resolve a tenant code.
    pub fn resolve(&self, code: &str) -> DbResult<&'static TenantEntry> {
        self.entries
            .iter()
            .find(|entry| entry.code == code)
            .ok_or_else(|| DbError::UnknownTenant(code.to_string()))
    }

    /// Check if a tenant code is known.
    pub fn contains(&self, code: &str) -> bool {
        self.resolve(code).is_ok()
    }

    /// All entries, in declaration order.
    pub fn all(&self) -> &'static [TenantEntry] {
        self.entries
    }

    /// Tenant codes whose data lives in `physical_database`.
    pub fn aliases_of(&self, physical_database: &str) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| entry.physical_database == physical_database)
            .map(|entry| entry.code)
            .collect()
    }

    /// Distinct physical databases, in order of first appearance.
    pub fn physical_databases(&self) -> Vec<&'static str> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .map(|entry| entry.physical_database)
            .filter(|db| seen.insert(*db))
            .collect()
    }

    /// Get the number of tenants.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
