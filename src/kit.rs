//! Request Kit
//!
//! Context threaded through every data-access call.
//! Carries the actor and correlation id used for audit, the tenant used for
//! scoping, and the caller's deadline.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::errors::{DalError, DalResult};

/// Actor recorded when the caller does not name one
pub const SYSTEM_USER: &str = "system";

/// Per-request context
#[derive(Debug, Clone)]
pub struct Kit {
    /// Request correlation id
    pub rid: String,

    /// Acting user, written to creator/reviser and audit operator
    pub user: String,

    /// Calling application
    pub app_code: String,

    /// Tenant the request belongs to
    pub tenant_id: Option<String>,

    /// Point after which in-flight work is abandoned
    pub deadline: Option<Instant>,
}

impl Kit {
    /// Create a kit for the given actor with a fresh request id
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            rid: Uuid::new_v4().simple().to_string(),
            user: user.into(),
            app_code: String::new(),
            tenant_id: None,
            deadline: None,
        }
    }

    /// Kit for engine-internal work
    pub fn system() -> Self {
        Self::new(SYSTEM_USER)
    }

    pub fn with_rid(mut self, rid: impl Into<String>) -> Self {
        self.rid = rid.into();
        self
    }

    pub fn with_app_code(mut self, app_code: impl Into<String>) -> Self {
        self.app_code = app_code.into();
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Fail once the deadline has passed
    pub fn check_deadline(&self) -> DalResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(DalError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

impl Default for Kit {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_kit_has_rid() {
        let a = Kit::new("alice");
        let b = Kit::new("alice");
        assert_eq!(a.user, "alice");
        assert_eq!(a.rid.len(), 32);
        assert_ne!(a.rid, b.rid);
        assert!(a.tenant_id.is_none());
    }

    #[test]
    fn test_builders() {
        let kit = Kit::system()
            .with_rid("rid-1")
            .with_app_code("hcm")
            .with_tenant("t1");
        assert_eq!(kit.user, SYSTEM_USER);
        assert_eq!(kit.rid, "rid-1");
        assert_eq!(kit.app_code, "hcm");
        assert_eq!(kit.tenant_id.as_deref(), Some("t1"));
    }

    #[test]
    fn test_deadline() {
        let kit = Kit::system();
        assert!(kit.check_deadline().is_ok());

        let kit = Kit::system().with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(matches!(kit.check_deadline(), Err(DalError::DeadlineExceeded)));

        let kit = Kit::system().with_timeout(Duration::from_secs(60));
        assert!(kit.check_deadline().is_ok());
    }
}
