use crate::config::Role;
use crate::error::RoleError;

/// Only host devices accept control; followers are read-only.
pub fn permits_control(role: Role) -> bool {
    role == Role::Host
}

pub fn ensure_host(role: Role, device: &str) -> Result<(), RoleError> {
    if permits_control(role) {
        Ok(())
    } else {
        Err(RoleError {
            device: device.to_owned(),
        })
    }
}
