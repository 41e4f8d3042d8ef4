pub mod attachment;
pub mod chat;
pub mod department;
pub mod event;
pub mod feedback;
pub mod rbac;
pub mod task;
pub mod tenant;
pub mod user;
pub mod venue;

pub use attachment::Attachment;
pub use chat::ChatMessage;
pub use department::{Department, DepartmentMember};
pub use event::Event;
pub use feedback::{Feedback, FeedbackSummary};
pub use rbac::{MemberDetail, Membership, Permission, Role, RoleWithPermissions, TenantModule};
pub use task::Task;
pub use tenant::{Tenant, TenantMembershipSummary};
pub use user::User;
pub use venue::Venue;
