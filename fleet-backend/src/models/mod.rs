pub mod account;
pub mod task;
pub mod window;

pub use account::{normalize_email, Account, AccountStatus};
pub use task::{
    AccountProgress, AccountProgressStatus, TaskProgress, TaskStatus, WorkflowKind,
};
pub use window::{DeviceClass, WindowInfo};
