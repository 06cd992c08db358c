//! Identity & access models

pub mod operation_log;
pub mod permission;
pub mod role;
pub mod user;

// Re-export for convenience
pub use operation_log::{LogFilter, NewOperationLog, OperationLog};
pub use permission::{NewPermission, Permission, PermissionKind, PermissionMeta, UpdatePermission};
pub use role::{NewRole, RecordStatus, Role, UpdateRole};
pub use user::{
    NewUser, Page, ProfileUpdate, User, UserCredential, UserFilter, UserStatus, UserWithRole,
};
