text_enum! {
    /// Account role. Admins manage everything; vendors manage the catalog;
    /// support staff work the order queue.
    pub enum Role {
        Customer => "customer",
        Admin => "admin",
        Vendor => "vendor",
        Support => "support",
    }
}

text_enum! {
    pub enum UserStatus {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
        PendingVerification => "pending_verification",
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::Customer
    }
}

impl Role {
    #[must_use]
    pub const fn can_manage_catalog(self) -> bool {
        matches!(self, Role::Admin | Role::Vendor)
    }

    #[must_use]
    pub const fn can_manage_orders(self) -> bool {
        matches!(self, Role::Admin | Role::Support)
    }

    #[must_use]
    pub const fn is_staff(self) -> bool {
        !matches!(self, Role::Customer)
    }
}

impl UserStatus {
    /// Whether a user in this state may hold a session at all.
    #[must_use]
    pub const fn can_sign_in(self, require_verification: bool) -> bool {
        match self {
            UserStatus::Active => true,
            UserStatus::PendingVerification => !require_verification,
            UserStatus::Inactive | UserStatus::Suspended => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_capabilities() {
        assert!(Role::Admin.can_manage_catalog());
        assert!(Role::Vendor.can_manage_catalog());
        assert!(!Role::Support.can_manage_catalog());
        assert!(Role::Support.can_manage_orders());
        assert!(!Role::Customer.can_manage_orders());
        assert!(!Role::Customer.is_staff());
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(Role::parse("vendor"), Some(Role::Vendor));
        assert_eq!(Role::parse("root"), None);
        assert_eq!(Role::Support.to_string(), "support");
    }

    #[test]
    fn test_sign_in_by_status() {
        assert!(UserStatus::Active.can_sign_in(true));
        assert!(UserStatus::PendingVerification.can_sign_in(false));
        assert!(!UserStatus::PendingVerification.can_sign_in(true));
        assert!(!UserStatus::Suspended.can_sign_in(false));
        assert!(!UserStatus::Inactive.can_sign_in(false));
    }
}
