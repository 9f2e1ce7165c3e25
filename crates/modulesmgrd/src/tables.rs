//! Table and field names written by modulesmgrd.
//!
//! These match the STATE_DB schema consumed by xcvrd.

/// STATE_DB table holding the control type of every classified module.
pub const STATE_MODULES_MGMT_TABLE_NAME: &str = "TRANSCEIVER_MODULES_MGMT";

/// Key separator used by STATE_DB.
pub const STATE_DB_SEPARATOR: &str = "|";

/// Returns the STATE_DB key for a port's control-type row.
pub fn modules_mgmt_key(port: usize) -> String {
    format!("{}{}{}", STATE_MODULES_MGMT_TABLE_NAME, STATE_DB_SEPARATOR, port)
}

/// Field names used in the modules management table.
pub mod fields {
    /// Resolved control type ("FW_CONTROL" or "SW_CONTROL").
    pub const CONTROL_TYPE: &str = "control_type";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modules_mgmt_key() {
        assert_eq!(modules_mgmt_key(7), "TRANSCEIVER_MODULES_MGMT|7");
    }
}
